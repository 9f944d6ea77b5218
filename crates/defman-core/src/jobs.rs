//! Supervised background jobs
//!
//! Every sync, deploy or autoconfig run started without blocking the caller
//! goes through the [`JobManager`]. Each job gets a wall-clock timeout and a
//! cancellation token. The work checks the token at safe points; on timeout
//! the job is marked `timed_out` right away, and its target stays reserved
//! until the work has actually returned (and rolled back).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::events::{EventSink, Stage, StatusEvent};
use crate::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::validation(format!("invalid job id '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Sync,
    Deploy,
    Autoconfig,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Deploy => "deploy",
            Self::Autoconfig => "autoconfig",
        }
    }

    /// Default wall-clock budget for this kind.
    pub fn timeout(&self, config: &JobsConfig) -> Duration {
        Duration::from_secs(match self {
            Self::Sync => config.sync_timeout_secs,
            Self::Deploy => config.deploy_timeout_secs,
            Self::Autoconfig => config.autoconfig_timeout_secs,
        })
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Transitions only move forward: pending, running, then one terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }

    fn stage(&self) -> Option<Stage> {
        match self {
            Self::Pending => None,
            Self::Running => Some(Stage::Started),
            Self::Completed => Some(Stage::Completed),
            Self::Failed => Some(Stage::Failed),
            Self::Cancelled => Some(Stage::Cancelled),
            Self::TimedOut => Some(Stage::TimedOut),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Public view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJob {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Logical target; at most one active job per target.
    pub target: String,
    pub target_ids: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Category of `last_error`, for callers that map failures to exit codes.
    pub error_kind: Option<ErrorKind>,
    /// Artifact ids named by the failure.
    #[serde(default)]
    pub failed_ids: Vec<String>,
    pub summary: Option<String>,
}

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub target: String,
    pub target_ids: Vec<String>,
    /// Further targets the job keeps busy while it runs.
    pub also_holds: Vec<String>,
    /// Overrides the kind's default timeout.
    pub timeout: Option<Duration>,
}

impl JobSpec {
    pub fn new(kind: JobKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            target_ids: Vec::new(),
            also_holds: Vec::new(),
            timeout: None,
        }
    }

    pub fn holding(mut self, target: impl Into<String>) -> Self {
        self.also_holds.push(target.into());
        self
    }

    fn targets(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.target).chain(&self.also_holds)
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.target_ids = ids;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub active_only: bool,
}

impl JobFilter {
    fn matches(&self, job: &DeploymentJob) -> bool {
        self.kind.is_none_or(|k| k == job.kind)
            && self.status.is_none_or(|s| s == job.status)
            && (!self.active_only || !job.status.is_terminal())
    }
}

/// Handle passed to running work.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: Option<JobId>,
    kind: JobKind,
    token: CancellationToken,
    sink: Arc<dyn EventSink>,
}

impl JobContext {
    /// A context for work run directly, outside the job manager.
    pub fn detached(kind: JobKind, sink: Arc<dyn EventSink>) -> Self {
        Self {
            job_id: None,
            kind,
            token: CancellationToken::new(),
            sink,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Safe point: bail out with [`Error::Cancelled`] if asked to stop.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn emit(&self, stage: Stage, message: impl Into<String>) {
        self.sink
            .emit(StatusEvent::new(self.job_id, self.kind, stage, message));
    }

    pub fn progress(&self, done: usize, total: usize, message: impl Into<String>) {
        self.sink.emit(
            StatusEvent::new(self.job_id, self.kind, Stage::Progress, message)
                .with_progress(done, total),
        );
    }

    /// The same job seen as another kind, sharing the token.
    pub fn as_kind(&self, kind: JobKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

#[derive(Debug)]
struct JobEntry {
    record: DeploymentJob,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct JobTable {
    order: VecDeque<JobId>,
    jobs: HashMap<JobId, JobEntry>,
    active: HashMap<String, JobId>,
}

impl JobTable {
    fn evict(&mut self, config: &JobsConfig, now: DateTime<Utc>) {
        let max_age = chrono::Duration::seconds(config.retention_secs as i64);
        let expired = |entry: &JobEntry| {
            entry.record.status.is_terminal()
                && entry
                    .record
                    .completed_at
                    .is_some_and(|done| now - done > max_age)
        };

        let jobs = &mut self.jobs;
        self.order.retain(|id| {
            let keep = jobs.get(id).is_some_and(|entry| !expired(entry));
            if !keep {
                jobs.remove(id);
            }
            keep
        });

        while self.jobs.len() > config.retention_count {
            let oldest_finished = self
                .order
                .iter()
                .position(|id| self.jobs.get(id).is_some_and(|e| e.record.status.is_terminal()));
            let Some(pos) = oldest_finished else { break };
            if let Some(id) = self.order.remove(pos) {
                self.jobs.remove(&id);
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    table: Mutex<JobTable>,
    changed: Notify,
    config: JobsConfig,
    sink: Arc<dyn EventSink>,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `id` to `next` if that is a forward transition.
    fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        error: Option<&Error>,
        summary: Option<String>,
    ) -> bool {
        let event = {
            let mut table = self.table();
            let Some(entry) = table.jobs.get_mut(&id) else {
                return false;
            };
            let record = &mut entry.record;
            if !record.status.can_transition_to(next) {
                tracing::debug!(job = %id, from = %record.status, to = %next, "Ignoring late transition");
                return false;
            }
            record.status = next;
            let now = Utc::now();
            if next == JobStatus::Running {
                record.started_at = Some(now);
            }
            if next.is_terminal() {
                record.completed_at = Some(now);
                record.last_error = error.map(Error::to_string);
                record.error_kind = error.map(Error::kind);
                record.failed_ids = error.map(Error::failed_ids).unwrap_or_default();
                record.summary = summary.clone();
            }
            let message = error.map(Error::to_string).or(summary).unwrap_or_default();
            next.stage()
                .map(|stage| StatusEvent::new(Some(id), record.kind, stage, message))
        };

        if let Some(event) = event {
            self.sink.emit(event);
        }
        self.changed.notify_waiters();
        true
    }

    fn release(&self, id: JobId) {
        let mut table = self.table();
        table.active.retain(|_, holder| *holder != id);
        let now = Utc::now();
        table.evict(&self.config, now);
        drop(table);
        self.changed.notify_waiters();
    }
}

/// Tracks and supervises background jobs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(config: JobsConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(JobTable::default()),
                changed: Notify::new(),
                config,
                sink,
            }),
        }
    }

    /// Start `work` as a supervised job.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`Error::Conflict`] while another job holds the same target.
    pub fn submit<F, Fut>(&self, spec: JobSpec, work: F) -> Result<JobId>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let id = JobId::new();
        let token = CancellationToken::new();
        {
            let mut table = self.inner.table();
            table.evict(&self.inner.config, Utc::now());
            if let Some((target, active)) = spec
                .targets()
                .find_map(|target| table.active.get(target).map(|active| (target, active)))
            {
                return Err(Error::Conflict {
                    target: target.clone(),
                    job_id: active.to_string(),
                });
            }
            for target in spec.targets() {
                table.active.insert(target.clone(), id);
            }
            table.order.push_back(id);
            table.jobs.insert(
                id,
                JobEntry {
                    record: DeploymentJob {
                        job_id: id,
                        kind: spec.kind,
                        status: JobStatus::Pending,
                        target: spec.target.clone(),
                        target_ids: spec.target_ids.clone(),
                        submitted_at: Utc::now(),
                        started_at: None,
                        completed_at: None,
                        last_error: None,
                        error_kind: None,
                        failed_ids: Vec::new(),
                        summary: None,
                    },
                    token: token.clone(),
                },
            );
        }

        let timeout = spec
            .timeout
            .unwrap_or_else(|| spec.kind.timeout(&self.inner.config));
        let ctx = JobContext {
            job_id: Some(id),
            kind: spec.kind,
            token: token.clone(),
            sink: self.inner.sink.clone(),
        };
        tracing::info!(job = %id, kind = %spec.kind, target = %spec.target, ?timeout, "Job submitted");

        let future = work(ctx);
        tokio::spawn(supervise(self.inner.clone(), id, timeout, token, future));
        Ok(id)
    }

    /// Like [`submit`](Self::submit) for synchronous work, run on the
    /// blocking pool.
    pub fn submit_blocking<F>(&self, spec: JobSpec, work: F) -> Result<JobId>
    where
        F: FnOnce(JobContext) -> Result<String> + Send + 'static,
    {
        self.submit(spec, move |ctx| async move {
            tokio::task::spawn_blocking(move || work(ctx))
                .await
                .map_err(|e| Error::Task(e.to_string()))?
        })
    }

    pub fn status(&self, id: JobId) -> Option<DeploymentJob> {
        self.inner
            .table()
            .jobs
            .get(&id)
            .map(|entry| entry.record.clone())
    }

    /// Ask a job to stop. Returns `false` for unknown or finished jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        let table = self.inner.table();
        match table.jobs.get(&id) {
            Some(entry) if !entry.record.status.is_terminal() => {
                tracing::info!(job = %id, "Cancellation requested");
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn list(&self, filter: JobFilter) -> Vec<DeploymentJob> {
        let table = self.inner.table();
        table
            .order
            .iter()
            .filter_map(|id| table.jobs.get(id))
            .map(|entry| &entry.record)
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    /// Whether some job's work is still running against `target`.
    pub fn is_target_active(&self, target: &str) -> bool {
        self.inner.table().active.contains_key(target)
    }

    /// Wait until the job is finished and its work has returned.
    pub async fn wait(&self, id: JobId) -> Result<DeploymentJob> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let table = self.inner.table();
                let entry = table
                    .jobs
                    .get(&id)
                    .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
                let record = &entry.record;
                let released = !table.active.values().any(|holder| *holder == id);
                if record.status.is_terminal() && released {
                    return Ok(record.clone());
                }
            }

            notified.await;
        }
    }
}

async fn supervise<Fut>(
    inner: Arc<Inner>,
    id: JobId,
    timeout: Duration,
    token: CancellationToken,
    work: Fut,
) where
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    if token.is_cancelled() {
        inner.transition(id, JobStatus::Cancelled, None, Some("cancelled before start".into()));
        inner.release(id);
        return;
    }

    inner.transition(id, JobStatus::Running, None, Some("started".into()));
    let mut handle = tokio::spawn(work);

    let joined = tokio::select! {
        joined = &mut handle => Some(joined),
        _ = tokio::time::sleep(timeout) => None,
    };

    match joined {
        Some(joined) => finish(&inner, id, joined),
        None => {
            tracing::warn!(job = %id, ?timeout, "Job timed out, cancelling");
            token.cancel();
            inner.transition(
                id,
                JobStatus::TimedOut,
                Some(&Error::Timeout(timeout)),
                None,
            );
            // Keep the target reserved until the work has unwound.
            match handle.await {
                Ok(Ok(_)) => tracing::debug!(job = %id, "Timed-out work finished anyway"),
                Ok(Err(e)) => tracing::debug!(job = %id, error = %e, "Timed-out work stopped"),
                Err(e) => tracing::error!(job = %id, error = %e, "Timed-out work panicked"),
            }
        }
    }

    inner.release(id);
}

fn finish(inner: &Inner, id: JobId, joined: std::result::Result<Result<String>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(summary)) => {
            tracing::info!(job = %id, %summary, "Job completed");
            inner.transition(id, JobStatus::Completed, None, Some(summary));
        }
        Ok(Err(Error::Cancelled)) => {
            tracing::info!(job = %id, "Job cancelled");
            inner.transition(id, JobStatus::Cancelled, None, Some("cancelled".into()));
        }
        Ok(Err(e)) => {
            tracing::warn!(job = %id, error = %e, "Job failed");
            inner.transition(id, JobStatus::Failed, Some(&e), None);
        }
        Err(e) => {
            tracing::error!(job = %id, error = %e, "Job panicked");
            let panicked = Error::Task(format!("job panicked: {e}"));
            inner.transition(id, JobStatus::Failed, Some(&panicked), None);
        }
    }
}
