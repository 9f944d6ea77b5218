//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:7878";

/// defman - resolve, sync and deploy versioned definitions
#[derive(Parser, Debug)]
#[command(name = "defman")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub project: ProjectArgs,

    /// The command to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where the project lives and how it is configured.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectArgs {
    /// Project root (default: nearest directory with defman.toml)
    #[arg(long, global = true, env = "DEFMAN_ROOT")]
    pub root: Option<PathBuf>,

    /// Extra config file layered over the global and project configs
    #[arg(long, global = true, env = "DEFMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the global config.toml
    #[arg(long, global = true, env = "DEFMAN_GLOBAL_CONFIG_DIR", hide = true)]
    pub global_config_dir: Option<PathBuf>,
}

/// A running defman-server.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ServerArgs {
    /// Server base URL
    #[arg(long, env = "DEFMAN_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Refresh the local cache from remote sources
    ///
    /// Examples:
    ///   defman sync          # every enabled source
    ///   defman sync team     # one source, even if disabled
    Sync {
        /// Source name from defman.toml
        source: Option<String>,
    },

    /// Deploy resolved definitions into the target directory
    ///
    /// Examples:
    ///   defman deploy reviewer tester   # two artifacts, one transaction
    ///   defman deploy --batch           # every winner of the plan
    Deploy {
        /// Artifact ids to deploy
        #[arg(required_unless_present = "batch")]
        ids: Vec<String>,

        /// Deploy every resolved definition
        #[arg(long, conflicts_with = "ids")]
        batch: bool,

        /// Profile applied during resolution
        #[arg(short, long)]
        profile: Option<String>,

        /// Override the deploy timeout, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show a job, or every job, on a running server
    Status {
        /// Job id (lists all jobs when omitted)
        job_id: Option<String>,

        #[command(flatten)]
        server: ServerArgs,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Ask a running server to cancel a job
    Cancel {
        /// Job id
        job_id: String,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Print the resolution plan without deploying
    Resolve {
        /// Profile applied during resolution
        #[arg(short, long)]
        profile: Option<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Roll back deploys the journal shows as unfinished
    Recover,

    /// Detect the project stack, sync sources and deploy its profile
    Autoconfig,

    /// Inspect or prune deploy backups
    Backups {
        #[command(subcommand)]
        action: BackupsAction,
    },
}

/// Backup subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum BackupsAction {
    /// List backups, oldest first
    List,
    /// Apply the retention policy now
    Prune,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_deploy_ids() {
        let cli = Cli::parse_from(["defman", "deploy", "reviewer", "tester", "-p", "rust"]);
        match cli.command {
            Some(Commands::Deploy {
                ids,
                batch,
                profile,
                timeout,
            }) => {
                assert_eq!(ids, vec!["reviewer", "tester"]);
                assert!(!batch);
                assert_eq!(profile.as_deref(), Some("rust"));
                assert_eq!(timeout, None);
            }
            _ => panic!("Expected Deploy command"),
        }
    }

    #[test]
    fn parse_deploy_batch() {
        let cli = Cli::parse_from(["defman", "deploy", "--batch"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Deploy { batch: true, .. })
        ));
    }

    #[test]
    fn deploy_needs_ids_or_batch() {
        assert!(Cli::try_parse_from(["defman", "deploy"]).is_err());
        assert!(Cli::try_parse_from(["defman", "deploy", "--batch", "reviewer"]).is_err());
    }

    #[test]
    fn parse_sync_without_source() {
        let cli = Cli::parse_from(["defman", "sync"]);
        assert_eq!(cli.command, Some(Commands::Sync { source: None }));
    }

    #[test]
    fn parse_status_with_server() {
        let cli = Cli::parse_from(["defman", "status", "--server", "http://localhost:9000"]);
        match cli.command {
            Some(Commands::Status {
                job_id, server, ..
            }) => {
                assert_eq!(job_id, None);
                assert_eq!(server.server, "http://localhost:9000");
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn parse_global_root_after_subcommand() {
        let cli = Cli::parse_from(["defman", "resolve", "--root", "/srv/app"]);
        assert_eq!(cli.project.root, Some(PathBuf::from("/srv/app")));
    }

    #[test]
    fn parse_backups_prune() {
        let cli = Cli::parse_from(["defman", "backups", "prune"]);
        assert_eq!(
            cli.command,
            Some(Commands::Backups {
                action: BackupsAction::Prune
            })
        );
    }
}
