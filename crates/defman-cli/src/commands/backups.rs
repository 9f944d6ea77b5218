//! Backup commands

use colored::Colorize;

use crate::context::Context;
use crate::error::Result;

/// Run `backups list`
pub fn run_backups_list(ctx: &Context) -> Result<()> {
    let backups = ctx.service.engine().backups().list()?;

    println!("{}", "Backups".bold());
    println!();
    if backups.is_empty() {
        println!("  {}", "None".dimmed());
        return Ok(());
    }
    for backup in &backups {
        println!(
            "  {} {} {} path(s), {}",
            "+".green(),
            backup.id.cyan(),
            backup.metadata.entries.len(),
            backup
                .metadata
                .created
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
                .dimmed()
        );
    }
    Ok(())
}

/// Run `backups prune`
pub fn run_backups_prune(ctx: &Context) -> Result<()> {
    let policy = &ctx.service.config().backups;
    let pruned = ctx.service.engine().prune_backups(policy, None)?;

    if pruned.is_empty() {
        println!(
            "{} Nothing to prune (keeping up to {} for {} days).",
            "OK".green().bold(),
            policy.retention_count,
            policy.retention_days
        );
    } else {
        println!("{} Pruned {} backup(s):", "OK".green().bold(), pruned.len());
        for id in &pruned {
            println!("   {} {}", "-".red(), id);
        }
    }
    Ok(())
}
