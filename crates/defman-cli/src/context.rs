//! Project context: root detection, config loading and the service
//!
//! Commands work from any directory inside a project, the way git does:
//! the root is the nearest ancestor holding `defman.toml` or a `.defman`
//! state directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use defman_core::{
    ConfigLoader, DeployService, DeploymentJob, EventSink, JobId, JobStatus, PROJECT_CONFIG_FILE,
    StatusEvent,
};
use tokio::runtime::Runtime;

use crate::cli::ProjectArgs;
use crate::error::{CliError, Result};

const STATE_DIR: &str = ".defman";

/// Find the project root for `cwd`, falling back to `cwd` itself.
pub fn detect_root(cwd: &Path) -> PathBuf {
    let mut current = Some(cwd);
    while let Some(dir) = current {
        if dir.join(PROJECT_CONFIG_FILE).is_file() || dir.join(STATE_DIR).is_dir() {
            return dir.to_path_buf();
        }
        current = dir.parent();
    }
    cwd.to_path_buf()
}

/// Prints status events to stderr as work progresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: StatusEvent) {
        let progress = event
            .progress
            .map(|p| format!(" {:>3.0}%", p * 100.0))
            .unwrap_or_default();
        eprintln!(
            "{} {}{} {}",
            "=>".blue().bold(),
            event.phase.cyan(),
            progress,
            event.message.dimmed()
        );
    }
}

/// A loaded project.
pub struct Context {
    pub service: Arc<DeployService>,
    pub runtime: Runtime,
}

impl Context {
    pub fn load(args: &ProjectArgs) -> Result<Self> {
        let root = match &args.root {
            Some(root) => std::path::absolute(root)?,
            None => detect_root(&std::env::current_dir()?),
        };
        tracing::debug!(root = %root.display(), "Loading project");

        let mut loader = ConfigLoader::new(root.clone());
        if let Some(dir) = &args.global_config_dir {
            loader = loader.with_global_config_dir(dir.clone());
        }
        if let Some(file) = &args.config {
            loader = loader.with_config_file(file.clone());
        }
        let service = DeployService::builder(loader.load()?, root)
            .sink(Arc::new(ConsoleSink))
            .build()?;

        Ok(Self {
            service: Arc::new(service),
            runtime: runtime()?,
        })
    }

    /// Submit a job and wait for it, cancelling on Ctrl-C.
    ///
    /// Any terminal state other than `completed` becomes [`CliError::Job`].
    pub fn run_job<F>(&self, submit: F) -> Result<DeploymentJob>
    where
        F: FnOnce(&Arc<DeployService>) -> defman_core::Result<JobId>,
    {
        let job = self.runtime.block_on(async {
            let id = submit(&self.service)?;
            let jobs = self.service.jobs();
            tokio::select! {
                job = jobs.wait(id) => job,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("{} cancelling job {}", "!".yellow().bold(), id);
                    jobs.cancel(id);
                    jobs.wait(id).await
                }
            }
        })?;

        if job.status == JobStatus::Completed {
            return Ok(job);
        }
        Err(CliError::Job {
            job_id: job.job_id,
            kind: job.kind,
            status: job.status,
            error_kind: job.error_kind,
            message: job
                .last_error
                .or(job.summary)
                .unwrap_or_else(|| job.status.to_string()),
            failed_ids: job.failed_ids,
        })
    }
}

/// A runtime for one command invocation.
pub fn runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}
