//! The transport seam shared by all remote source kinds

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// How a source is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Http,
    Git,
}

impl SourceKind {
    /// Guess the kind from a URL when the configuration does not say.
    pub fn infer(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.ends_with(".git")
            || lower.starts_with("git@")
            || lower.starts_with("git://")
            || lower.starts_with("ssh://")
            || lower.starts_with("file://")
        {
            Self::Git
        } else {
            Self::Http
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Git => write!(f, "git"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "https" => Ok(Self::Http),
            "git" => Ok(Self::Git),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

/// One conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// The version tag seen on the last successful fetch.
    pub etag: Option<String>,
    /// Directory inside a git checkout holding the definitions.
    pub subdir: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            etag: None,
            subdir: None,
        }
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_subdir(mut self, subdir: Option<String>) -> Self {
        self.subdir = subdir;
        self
    }
}

/// A single definition file as delivered by a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    /// File stem; the cache stores it as `<name>.md`.
    pub name: String,
    pub content: Vec<u8>,
}

/// Outcome of a conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    /// The remote still matches the request's etag.
    NotModified,
    /// The full artifact set and the tag identifying it.
    Modified {
        etag: Option<String>,
        artifacts: Vec<RemoteArtifact>,
    },
}

/// Fetches the complete artifact set of a remote source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// The source kind this fetcher serves.
    fn kind(&self) -> SourceKind;

    /// Fetch `request.url`, short-circuiting when `request.etag` is current.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}
