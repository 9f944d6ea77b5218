//! Resolve command implementation

use colored::Colorize;
use defman_core::ResolutionPlan;

use crate::context::Context;
use crate::error::Result;

/// Run the resolve command
///
/// Prints the plan a deploy would apply; nothing is written.
pub fn run_resolve(ctx: &Context, profile: Option<&str>, json: bool) -> Result<()> {
    let plan = ctx.service.plan(profile)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &ResolutionPlan) {
    println!("{}", "Resolution Plan".bold());
    println!();

    if plan.is_empty() {
        println!("  {} (no definitions found)", "None".dimmed());
    }
    for (id, record) in &plan.winners {
        println!(
            "  {} {} {} {} {}",
            "+".green(),
            id.cyan(),
            record.version.to_string().bold(),
            record.tier.as_str().dimmed(),
            record.raw_path.display().to_string().dimmed()
        );
    }

    if !plan.conflicts.is_empty() {
        println!();
        println!("{}:", "Conflicts".bold());
        for conflict in &plan.conflicts {
            let marker = if conflict.ambiguous {
                "ambiguous".yellow().bold()
            } else {
                "resolved".dimmed()
            };
            println!(
                "  {} {} ({}, {} shadowed)",
                "!".yellow(),
                conflict.id.cyan(),
                marker,
                conflict.losers.len()
            );
        }
    }

    if !plan.excluded_ids.is_empty() {
        println!();
        println!("{}:", "Excluded".bold());
        for id in &plan.excluded_ids {
            println!("  {} {}", "-".red(), id);
        }
    }
}
