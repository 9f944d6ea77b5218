//! Recover command implementation

use colored::Colorize;

use crate::context::Context;
use crate::error::Result;

/// Run the recover command
///
/// Restores the backup of every deploy the journal shows as begun but never
/// committed or rolled back.
pub fn run_recover(ctx: &Context) -> Result<()> {
    println!("{} Checking deploy journal...", "=>".blue().bold());

    let recovered = ctx.service.recover()?;
    if recovered.is_empty() {
        println!("{} Nothing to recover.", "OK".green().bold());
        return Ok(());
    }

    println!(
        "{} Rolled back {} unfinished deploy(s):",
        "OK".green().bold(),
        recovered.len()
    );
    for tx in &recovered {
        println!(
            "   {} {} from backup {} ({} path(s))",
            "+".green(),
            tx.transaction_id.cyan(),
            tx.backup_id,
            tx.restored.len()
        );
    }
    Ok(())
}
