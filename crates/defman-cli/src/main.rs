//! defman CLI
//!
//! Syncs, resolves and deploys agent definitions. Exit codes:
//!
//! | Code | Meaning                              |
//! |------|--------------------------------------|
//! | 0    | success                              |
//! | 1    | partial or soft failure              |
//! | 2    | usage or validation error            |
//! | 3    | lock contention or timeout           |

mod cli;
mod commands;
mod context;
mod error;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cli::{BackupsAction, Cli, Commands};
use context::Context;
use error::Result;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            let failed = e.failed_ids();
            if !failed.is_empty() {
                eprintln!("{}: {}", "failed".red(), failed.join(", "));
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("defman=debug,defman_core=debug,defman_remote=debug")),
            )
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
        tracing::debug!("Verbose mode enabled");
    }

    match cli.command {
        Some(cmd) => execute_command(&cli.project, cmd),
        None => {
            println!("{} agent definition manager", "defman".green().bold());
            println!();
            println!("Run {} for available commands.", "defman --help".cyan());
            Ok(())
        }
    }
}

fn execute_command(project: &cli::ProjectArgs, cmd: Commands) -> Result<()> {
    let load = || Context::load(project);
    match cmd {
        Commands::Sync { source } => commands::run_sync(&load()?, source),
        Commands::Deploy {
            ids,
            batch,
            profile,
            timeout,
        } => {
            let ids = if batch { Vec::new() } else { ids };
            commands::run_deploy(&load()?, ids, profile, timeout)
        }
        Commands::Status {
            job_id,
            server,
            json,
        } => commands::run_status(&server.server, job_id.as_deref(), json),
        Commands::Cancel { job_id, server } => commands::run_cancel(&server.server, &job_id),
        Commands::Resolve { profile, json } => {
            commands::run_resolve(&load()?, profile.as_deref(), json)
        }
        Commands::Recover => commands::run_recover(&load()?),
        Commands::Autoconfig => commands::run_autoconfig(&load()?),
        Commands::Backups { action } => match action {
            BackupsAction::List => commands::run_backups_list(&load()?),
            BackupsAction::Prune => commands::run_backups_prune(&load()?),
        },
    }
}
