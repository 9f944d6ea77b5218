//! Sync command implementation

use colored::Colorize;

use crate::context::Context;
use crate::error::Result;

/// Run the sync command
///
/// Syncs one named source, or every enabled source, as a supervised job.
pub fn run_sync(ctx: &Context, source: Option<String>) -> Result<()> {
    let label = source.clone().unwrap_or_else(|| "all sources".to_string());
    println!("{} Syncing {}...", "=>".blue().bold(), label.cyan());

    let job = ctx.run_job(|service| service.submit_sync(source))?;

    println!(
        "{} {}",
        "OK".green().bold(),
        job.summary.unwrap_or_default()
    );
    Ok(())
}
