//! [`StaticFetcher`]: a remote that serves a fixed artifact set.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use defman_remote::{
    Error, FetchRequest, FetchResponse, Fetcher, RemoteArtifact, Result, SourceKind,
};

/// Serves the same artifacts under one etag until told otherwise.
///
/// A request carrying the current etag gets `NotModified`.
#[derive(Debug)]
pub struct StaticFetcher {
    kind: SourceKind,
    state: Mutex<Served>,
    fetches: AtomicUsize,
    delay: Duration,
}

#[derive(Debug, Clone)]
struct Served {
    etag: String,
    artifacts: Vec<RemoteArtifact>,
    fail_status: Option<u16>,
}

impl StaticFetcher {
    pub fn new(etag: &str, artifacts: &[(&str, &str)]) -> Self {
        Self {
            kind: SourceKind::Http,
            state: Mutex::new(Served {
                etag: etag.to_string(),
                artifacts: to_artifacts(artifacts),
                fail_status: None,
            }),
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Answer each fetch only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Publish a new revision.
    pub fn publish(&self, etag: &str, artifacts: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        state.etag = etag.to_string();
        state.artifacts = to_artifacts(artifacts);
    }

    /// Answer every following fetch with an HTTP status error.
    pub fn fail_with_status(&self, status: u16) {
        self.state.lock().unwrap().fail_status = Some(status);
    }

    /// Number of fetches served, including `NotModified` answers.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

fn to_artifacts(artifacts: &[(&str, &str)]) -> Vec<RemoteArtifact> {
    artifacts
        .iter()
        .map(|(name, content)| RemoteArtifact {
            name: (*name).to_string(),
            content: content.as_bytes().to_vec(),
        })
        .collect()
}

#[async_trait]
impl Fetcher for StaticFetcher {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let state = self.state.lock().unwrap().clone();
        if let Some(status) = state.fail_status {
            return Err(Error::Status {
                url: request.url.clone(),
                status,
            });
        }
        if request.etag.as_deref() == Some(state.etag.as_str()) {
            return Ok(FetchResponse::NotModified);
        }
        Ok(FetchResponse::Modified {
            etag: Some(state.etag),
            artifacts: state.artifacts,
        })
    }
}
