//! Remote sync client
//!
//! Each sync of a source writes a fresh hidden version directory
//! `<cache>/.<source-name>.v-<uuid>/` holding `<id>.md` files plus an
//! `.etag` sidecar. The pointer file `<cache>/<source-name>.current` names
//! the live version and is replaced by a single rename, so a reader resolves
//! either the complete old version or the complete new one, and the etag
//! only moves together with the content it describes. The version before
//! the live one is kept until the next swap for readers that resolved the
//! pointer just before it moved.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use defman_fs::{LockManager, RobustnessConfig, lock_file_beside, validate_identifier};
use defman_remote::{FetchRequest, FetchResponse, Fetcher, RemoteArtifact, SourceKind};
use serde::Serialize;

use crate::config::SyncSource;
use crate::events::Stage;
use crate::jobs::JobContext;
use crate::{Error, Result};

const ETAG_FILE: &str = ".etag";
const POINTER_SUFFIX: &str = ".current";

/// Outcome of syncing one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub source: String,
    /// `false` when the remote reported no change.
    pub updated: bool,
    pub records_fetched: usize,
    pub etag: Option<String>,
}

/// Fetches remote sources into the local cache.
#[derive(Clone)]
pub struct SyncClient {
    cache_root: PathBuf,
    locks: Arc<LockManager>,
    fetchers: HashMap<SourceKind, Arc<dyn Fetcher>>,
    lock_timeout: Duration,
    robustness: RobustnessConfig,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("cache_root", &self.cache_root)
            .field("kinds", &self.fetchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SyncClient {
    pub fn new(cache_root: impl Into<PathBuf>, locks: Arc<LockManager>, lock_timeout: Duration) -> Self {
        Self {
            cache_root: cache_root.into(),
            locks,
            fetchers: HashMap::new(),
            lock_timeout,
            robustness: RobustnessConfig::default(),
        }
    }

    /// Register the transport used for sources of `fetcher.kind()`.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.insert(fetcher.kind(), fetcher);
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Live cache version of `source`. Before the first sync this names a
    /// directory that does not exist, which scans as an empty tier.
    pub fn cache_dir(&self, source: &SyncSource) -> PathBuf {
        live_version(&self.cache_root, &source.name).unwrap_or_else(|| self.cache_root.join(&source.name))
    }

    /// Etag persisted by the last successful sync of `source`.
    pub fn cached_etag(&self, source: &SyncSource) -> Option<String> {
        fs::read_to_string(self.cache_dir(source).join(ETAG_FILE))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Fill `source.etag` from the cache.
    pub fn load_etag(&self, source: &mut SyncSource) {
        source.etag = self.cached_etag(source);
    }

    /// Sync one source, updating `source.etag` on success.
    pub async fn sync(&self, source: &mut SyncSource, ctx: &JobContext) -> Result<SyncResult> {
        validate_identifier(&source.name, "Source name")?;
        let kind = source.effective_kind();
        let fetcher = self
            .fetchers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::config(format!("no {kind} transport for source '{}'", source.name)))?;
        ctx.check_cancelled()?;

        let key = format!("sync:{}", source.url);
        let lock_file = lock_file_beside(&self.cache_root.join(&source.name));
        let locks = self.locks.clone();
        let timeout = self.lock_timeout;
        let _guard = tokio::task::spawn_blocking(move || locks.acquire_with_file(&key, &lock_file, timeout))
            .await
            .map_err(|e| Error::Task(e.to_string()))??;

        // The sidecar is authoritative once the lock is held.
        if source.etag.is_none() {
            self.load_etag(source);
        }
        let request = FetchRequest::new(source.url.clone())
            .with_etag(source.etag.clone())
            .with_subdir(source.subdir.clone());

        ctx.emit(Stage::Progress, format!("fetching {}", source.name));
        let response = fetcher.fetch(&request).await.map_err(|e| {
            tracing::warn!(source = %source.name, error = %e, retryable = e.is_retryable(), "Fetch failed");
            Error::from(e)
        })?;

        let (etag, artifacts) = match response {
            FetchResponse::NotModified => {
                tracing::debug!(source = %source.name, "Source not modified");
                return Ok(SyncResult {
                    source: source.name.clone(),
                    updated: false,
                    records_fetched: 0,
                    etag: source.etag.clone(),
                });
            }
            FetchResponse::Modified { etag, artifacts } => (etag, artifacts),
        };
        ctx.check_cancelled()?;

        let name = source.name.clone();
        let root = self.cache_root.clone();
        let robustness = self.robustness;
        let stored_etag = etag.clone();
        let written = tokio::task::spawn_blocking(move || {
            replace_cache(&root, &name, &artifacts, stored_etag.as_deref(), robustness)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;

        source.etag = etag.clone();
        tracing::info!(source = %source.name, records = written, "Source synced");
        Ok(SyncResult {
            source: source.name.clone(),
            updated: true,
            records_fetched: written,
            etag,
        })
    }

    /// Sync several sources in order, stopping at the first cancellation.
    ///
    /// A failing source does not stop the others; its error is returned in
    /// place of its result.
    pub async fn sync_all(&self, sources: &mut [SyncSource], ctx: &JobContext) -> Result<Vec<Result<SyncResult>>> {
        let total = sources.len();
        let mut results = Vec::with_capacity(total);
        for (index, source) in sources.iter_mut().enumerate() {
            ctx.check_cancelled()?;
            let result = self.sync(source, ctx).await;
            if let Err(Error::Cancelled) = result {
                return Err(Error::Cancelled);
            }
            ctx.progress(index + 1, total, format!("synced {}", source.name));
            results.push(result);
        }
        Ok(results)
    }
}

fn pointer_file(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}{POINTER_SUFFIX}"))
}

fn version_prefix(name: &str) -> String {
    format!(".{name}.v-")
}

fn live_version(root: &Path, name: &str) -> Option<PathBuf> {
    let version = fs::read_to_string(pointer_file(root, name)).ok()?;
    let version = version.trim();
    let plain = version.starts_with(&version_prefix(name)) && !version.contains(['/', '\\']);
    plain.then(|| root.join(version))
}

fn replace_cache(
    root: &Path,
    name: &str,
    artifacts: &[RemoteArtifact],
    etag: Option<&str>,
    robustness: RobustnessConfig,
) -> Result<usize> {
    fs::create_dir_all(root).map_err(|e| defman_fs::Error::io(root, e))?;
    let version = format!("{}{}", version_prefix(name), uuid::Uuid::new_v4().simple());
    let staged_dir = root.join(&version);
    let previous = live_version(root, name);

    let staged = stage(&staged_dir, artifacts, etag, robustness).and_then(|count| {
        defman_fs::io::write_atomic(&pointer_file(root, name), version.as_bytes(), robustness)?;
        Ok(count)
    });
    let written = match staged {
        Ok(count) => count,
        Err(e) => {
            let _ = fs::remove_dir_all(&staged_dir);
            return Err(e);
        }
    };

    retire_versions(root, name, &version, previous.as_deref());
    Ok(written)
}

/// Remove every version of `name` except `live` and `previous`.
fn retire_versions(root: &Path, name: &str, live: &str, previous: Option<&Path>) {
    let prefix = version_prefix(name);
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.starts_with(&prefix) || file_name == live || previous == Some(path.as_path()) {
            continue;
        }
        if let Err(e) = fs::remove_dir_all(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove retired cache");
        }
    }
}

fn stage(
    staging: &Path,
    artifacts: &[RemoteArtifact],
    etag: Option<&str>,
    robustness: RobustnessConfig,
) -> Result<usize> {
    fs::create_dir_all(staging).map_err(|e| defman_fs::Error::io(staging, e))?;
    let mut written = 0;
    for artifact in artifacts {
        if let Err(e) = validate_identifier(&artifact.name, "Remote file name") {
            tracing::warn!(name = %artifact.name, error = %e, "Skipping remote artifact");
            continue;
        }
        let path = staging.join(format!("{}.md", artifact.name));
        defman_fs::io::write_atomic(&path, &artifact.content, robustness)?;
        written += 1;
    }
    if let Some(etag) = etag {
        defman_fs::io::write_atomic(&staging.join(ETAG_FILE), etag.as_bytes(), robustness)?;
    }
    Ok(written)
}
