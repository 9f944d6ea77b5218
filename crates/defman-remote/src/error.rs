//! Error types for defman-remote

use std::path::PathBuf;

/// Result type for defman-remote operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while fetching a remote source
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid definition bundle from {url}: {message}")]
    InvalidBundle { url: String, message: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Remote {url} has no HEAD")]
    NoHead { url: String },

    #[error("Invalid subdirectory '{subdir}'")]
    InvalidSubdir { subdir: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fetch task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same fetch later may succeed.
    ///
    /// Malformed payloads and bad source configuration are permanent;
    /// everything on the wire is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidBundle { .. } | Self::InvalidSubdir { .. } => false,
            Self::Http(_) | Self::Git(_) | Self::NoHead { .. } | Self::Io { .. } | Self::Task(_) => {
                true
            }
        }
    }
}
