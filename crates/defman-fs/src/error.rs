//! Error types for defman-fs

use std::path::PathBuf;
use std::time::Duration;

/// Result type for defman-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in defman-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config at {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Failed to serialize {format} config at {path}: {message}")]
    ConfigSerialize {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },

    /// Another holder kept the lock for longer than the caller was willing to wait.
    #[error("Lock contention on '{key}' (gave up after {waited:?})")]
    LockContention { key: String, waited: Duration },

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: String,
        value: String,
        reason: String,
    },

    #[error("Path {path} escapes root {root}")]
    PathEscape { path: PathBuf, root: PathBuf },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is caused by a rejected name or path.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidIdentifier { .. } | Self::PathEscape { .. })
    }
}
