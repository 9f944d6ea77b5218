//! Dependency-injected facade over the engine
//!
//! [`DeployService`] owns one of each collaborator and is what the CLI and
//! the server talk to. Tests build it with fake file systems, fetchers and
//! sinks through [`DeployServiceBuilder`]. Long-lived processes share one
//! instance through [`DeployService::global_or_init`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use defman_fs::{FileSystem, LockManager, OsFileSystem, validate_identifier};
use defman_remote::{Fetcher, GitFetcher, HttpFetcher, SourceKind};

use crate::autoconfig::{AutoconfigReport, choose_profile, detect_stacks};
use crate::backup::BackupManager;
use crate::config::{EngineConfig, ResolvedPaths, SyncSource};
use crate::definition::Tier;
use crate::deploy::{DeployEngine, DeployResult, RecoveredTransaction};
use crate::events::{EventSink, TracingSink};
use crate::jobs::{JobContext, JobId, JobKind, JobManager, JobSpec};
use crate::journal::Journal;
use crate::resolver::{ResolutionPlan, resolve};
use crate::scan::{TierScan, scan_dir};
use crate::sync::{SyncClient, SyncResult};
use crate::{Error, Result};

static GLOBAL: OnceLock<Arc<DeployService>> = OnceLock::new();
static GLOBAL_INIT: Mutex<()> = Mutex::new(());

/// Builds a [`DeployService`], defaulting every collaborator not supplied.
pub struct DeployServiceBuilder {
    config: EngineConfig,
    project_root: PathBuf,
    fs: Option<Arc<dyn FileSystem>>,
    locks: Option<Arc<LockManager>>,
    sink: Option<Arc<dyn EventSink>>,
    fetchers: Vec<Arc<dyn Fetcher>>,
}

impl DeployServiceBuilder {
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn locks(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use `fetcher` for sources of its kind instead of the network default.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn build(self) -> Result<DeployService> {
        self.config.validate()?;
        let paths = ResolvedPaths::new(&self.config.paths, &self.project_root);
        let fs = self
            .fs
            .unwrap_or_else(|| Arc::new(OsFileSystem::default()));
        let locks = self.locks.unwrap_or_default();
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let lock_timeout = self.config.locks.timeout();

        let mut sync = SyncClient::new(&paths.cache_dir, locks.clone(), lock_timeout);
        let has = |kind: SourceKind| self.fetchers.iter().any(|f| f.kind() == kind);
        if !has(SourceKind::Http) {
            let timeout = Duration::from_secs(self.config.jobs.sync_timeout_secs);
            sync = sync.with_fetcher(Arc::new(HttpFetcher::new(timeout)?));
        }
        if !has(SourceKind::Git) {
            sync = sync.with_fetcher(Arc::new(GitFetcher::new()));
        }
        for fetcher in self.fetchers {
            sync = sync.with_fetcher(fetcher);
        }

        let engine = DeployEngine::new(
            fs.clone(),
            locks.clone(),
            BackupManager::new(&paths.backups_dir),
            Journal::new(&paths.journal_path),
            lock_timeout,
        )
        .with_retention(self.config.backups.clone());
        let jobs = JobManager::new(self.config.jobs.clone(), sink.clone());

        Ok(DeployService {
            config: self.config,
            paths,
            fs,
            locks,
            sink,
            engine,
            sync,
            jobs,
        })
    }
}

/// The engine's single entry point.
#[derive(Debug)]
pub struct DeployService {
    config: EngineConfig,
    paths: ResolvedPaths,
    fs: Arc<dyn FileSystem>,
    locks: Arc<LockManager>,
    sink: Arc<dyn EventSink>,
    engine: DeployEngine,
    sync: SyncClient,
    jobs: JobManager,
}

impl DeployService {
    pub fn builder(config: EngineConfig, project_root: impl Into<PathBuf>) -> DeployServiceBuilder {
        DeployServiceBuilder {
            config,
            project_root: project_root.into(),
            fs: None,
            locks: None,
            sink: None,
            fetchers: Vec::new(),
        }
    }

    /// The process-wide instance, built by `init` on first use.
    ///
    /// Concurrent first callers are serialized; exactly one `init` runs.
    pub fn global_or_init<F>(init: F) -> Result<Arc<DeployService>>
    where
        F: FnOnce() -> Result<DeployService>,
    {
        if let Some(service) = GLOBAL.get() {
            return Ok(service.clone());
        }
        let _init = GLOBAL_INIT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(service) = GLOBAL.get() {
            return Ok(service.clone());
        }
        let service = Arc::new(init()?);
        let _ = GLOBAL.set(service.clone());
        Ok(service)
    }

    /// The process-wide instance, if one was initialised.
    pub fn global() -> Option<Arc<DeployService>> {
        GLOBAL.get().cloned()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn engine(&self) -> &DeployEngine {
        &self.engine
    }

    pub fn sync_client(&self) -> &SyncClient {
        &self.sync
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// A context for running work directly on the caller's thread.
    pub fn detached_context(&self, kind: JobKind) -> JobContext {
        JobContext::detached(kind, self.sink.clone())
    }

    /// Job-manager key for deploys into the configured target.
    pub fn deploy_target(&self) -> String {
        format!("deploy:{}", self.paths.target_dir.display())
    }

    /// Scan every tier, lowest precedence first.
    pub fn scan(&self) -> Result<Vec<TierScan>> {
        let mut scans = Vec::new();
        if let Some(bundled) = &self.paths.bundled_dir {
            scans.push(scan_dir(bundled, Tier::Bundled, None)?);
        }
        for source in self.config.sources.iter().filter(|s| s.enabled) {
            let dir = self.sync.cache_dir(source);
            scans.push(scan_dir(&dir, Tier::CacheRemote, Some((source.name.as_str(), source.priority)))?);
        }
        if let Some(user) = &self.paths.user_dir {
            scans.push(scan_dir(user, Tier::User, None)?);
        }
        scans.push(scan_dir(&self.paths.project_dir, Tier::Project, None)?);
        Ok(scans)
    }

    pub fn plan(&self, profile: Option<&str>) -> Result<ResolutionPlan> {
        let profile = self.config.profile(profile)?;
        Ok(resolve(&self.scan()?, &profile))
    }

    /// Deploy `ids` (every winner when empty) on the calling thread.
    pub fn deploy(&self, ids: &[String], profile: Option<&str>, ctx: &JobContext) -> Result<DeployResult> {
        validate_ids(ids)?;
        let plan = self.plan(profile)?;
        let plan = if ids.is_empty() { plan } else { plan.subset(ids)? };
        self.engine.deploy(&plan, &self.paths.target_dir, ctx)
    }

    pub fn recover(&self) -> Result<Vec<RecoveredTransaction>> {
        self.engine.recover()
    }

    /// Sources selected by `name`, or every enabled source.
    ///
    /// A source named explicitly is synced even when disabled.
    pub fn select_sources(&self, name: Option<&str>) -> Result<Vec<SyncSource>> {
        match name {
            Some(name) => {
                validate_identifier(name, "Source name")?;
                let source = self
                    .config
                    .source(name)
                    .ok_or_else(|| Error::NotFound(format!("source '{name}'")))?;
                Ok(vec![source.clone()])
            }
            None => Ok(self.config.sources.iter().filter(|s| s.enabled).cloned().collect()),
        }
    }

    /// Sync the selected sources; per-source failures are returned in place.
    pub async fn sync(&self, name: Option<&str>, ctx: &JobContext) -> Result<Vec<Result<SyncResult>>> {
        let mut sources = self.select_sources(name)?;
        for source in &mut sources {
            self.sync.load_etag(source);
        }
        self.sync.sync_all(&mut sources, ctx).await
    }

    /// Detect the project's stack, sync, then deploy with the mapped profile.
    pub async fn autoconfig(self: &Arc<Self>, ctx: &JobContext) -> Result<AutoconfigReport> {
        let stacks = detect_stacks(&self.paths.project_root);
        let profile = choose_profile(&self.config.autoconfig, &stacks);
        tracing::info!(stacks = ?stacks, profile = ?profile, "Autoconfiguring project");

        let mut synced = Vec::new();
        let mut sync_errors = Vec::new();
        for result in self.sync(None, &ctx.as_kind(JobKind::Sync)).await? {
            match result {
                Ok(result) => synced.push(result),
                Err(e) => sync_errors.push(e.to_string()),
            }
        }
        ctx.check_cancelled()?;

        let service = self.clone();
        let deploy_ctx = ctx.as_kind(JobKind::Deploy);
        let deploy_profile = profile.clone();
        let deploy = tokio::task::spawn_blocking(move || {
            service.deploy(&[], deploy_profile.as_deref(), &deploy_ctx)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;

        Ok(AutoconfigReport {
            stacks,
            profile,
            synced,
            sync_errors,
            deploy,
        })
    }

    /// Start a sync job. Unknown source names fail before a job exists.
    /// All sync jobs share [`SYNC_TARGET`].
    pub fn submit_sync(self: &Arc<Self>, name: Option<String>) -> Result<JobId> {
        let sources = self.select_sources(name.as_deref())?;
        let target = SYNC_TARGET.to_string();
        let ids: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();
        let service = self.clone();

        self.jobs
            .submit(JobSpec::new(JobKind::Sync, target).with_ids(ids.clone()), move |ctx| async move {
                let results = service.sync(name.as_deref(), &ctx).await?;
                summarize_sync(&ids, results)
            })
    }

    /// Start a deploy job. Ids are validated before a job exists.
    pub fn submit_deploy(self: &Arc<Self>, ids: Vec<String>, profile: Option<String>) -> Result<JobId> {
        self.submit_deploy_with(JobSpec::new(JobKind::Deploy, self.deploy_target()), ids, profile)
    }

    /// [`submit_deploy`](Self::submit_deploy) with an explicit job spec.
    pub fn submit_deploy_with(
        self: &Arc<Self>,
        spec: JobSpec,
        ids: Vec<String>,
        profile: Option<String>,
    ) -> Result<JobId> {
        validate_ids(&ids)?;
        let service = self.clone();
        self.jobs
            .submit_blocking(spec.with_ids(ids.clone()), move |ctx| {
                service
                    .deploy(&ids, profile.as_deref(), &ctx)
                    .map(|result| result.summary())
            })
    }

    /// Start an autoconfig job; it holds both the deploy target's slot and
    /// the sync slot.
    pub fn submit_autoconfig(self: &Arc<Self>) -> Result<JobId> {
        let service = self.clone();
        self.jobs.submit(
            JobSpec::new(JobKind::Autoconfig, self.deploy_target()).holding(SYNC_TARGET),
            move |ctx| async move { service.autoconfig(&ctx).await.map(|r| r.summary()) },
        )
    }

    pub fn project_root(&self) -> &Path {
        &self.paths.project_root
    }
}

/// Job-manager key shared by every sync job.
pub const SYNC_TARGET: &str = "sync";

fn validate_ids(ids: &[String]) -> Result<()> {
    for id in ids {
        validate_identifier(id, "Artifact id")?;
    }
    Ok(())
}

/// Collapse per-source outcomes into a job result. Failed sources are
/// named in the error.
fn summarize_sync(names: &[String], results: Vec<Result<SyncResult>>) -> Result<String> {
    let total = results.len();
    let mut updated = 0;
    let mut failed = Vec::new();
    let mut first_error = None;
    for (name, result) in names.iter().zip(results) {
        match result {
            Ok(r) if r.updated => updated += 1,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "Source failed to sync");
                failed.push(name.clone());
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if total == 1 => Err(e),
        Some(_) => Err(Error::PartialFailure {
            failed_count: failed.len(),
            failed,
            total,
        }),
        None => Ok(format!(
            "{updated} updated, {} unchanged",
            total - updated
        )),
    }
}
