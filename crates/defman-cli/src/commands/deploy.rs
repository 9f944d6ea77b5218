//! Deploy and autoconfig command implementations

use std::time::Duration;

use colored::Colorize;
use defman_core::{JobKind, JobSpec};

use crate::context::Context;
use crate::error::Result;

/// Run the deploy command
///
/// `ids` empty means the whole plan. Either way the deploy is one
/// transaction: all artifacts land or none do.
pub fn run_deploy(
    ctx: &Context,
    ids: Vec<String>,
    profile: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let label = if ids.is_empty() {
        "all definitions".to_string()
    } else {
        ids.join(", ")
    };
    println!("{} Deploying {}...", "=>".blue().bold(), label.cyan());

    let job = ctx.run_job(|service| {
        let mut spec = JobSpec::new(JobKind::Deploy, service.deploy_target());
        if let Some(secs) = timeout {
            spec = spec.with_timeout(Duration::from_secs(secs));
        }
        service.submit_deploy_with(spec, ids, profile)
    })?;

    println!(
        "{} {} ({})",
        "OK".green().bold(),
        job.summary.unwrap_or_default(),
        ctx.service.paths().target_dir.display().to_string().dimmed()
    );
    Ok(())
}

/// Run the autoconfig command
pub fn run_autoconfig(ctx: &Context) -> Result<()> {
    println!("{} Autoconfiguring project...", "=>".blue().bold());

    let job = ctx.run_job(|service| service.submit_autoconfig())?;

    println!(
        "{} {}",
        "OK".green().bold(),
        job.summary.unwrap_or_default()
    );
    Ok(())
}
