//! Error types for defman-core

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result type for defman-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification every error maps onto.
///
/// Front ends key their exit codes and HTTP statuses on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    LockContention,
    Transport,
    VerificationFailure,
    PartialFailure,
    Timeout,
    Cancelled,
    Conflict,
    NotFound,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::LockContention => "lock_contention",
            Self::Transport => "transport",
            Self::VerificationFailure => "verification_failure",
            Self::PartialFailure => "partial_failure",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Config => "config",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in defman-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Malformed definition {path}: {reason}")]
    MalformedDefinition { path: PathBuf, reason: String },

    #[error("Verification failed for '{id}': expected {expected}, found {actual}")]
    VerificationFailure {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("{failed_count} of {total} failed: {}", .failed.join(", "))]
    PartialFailure {
        failed: Vec<String>,
        failed_count: usize,
        total: usize,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Target '{target}' is busy with job {job_id}")]
    Conflict { target: String, job_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Rollback of transaction {transaction_id} failed: {message}")]
    RollbackFailed {
        transaction_id: String,
        message: String,
    },

    #[error("Background task failed: {0}")]
    Task(String),

    /// Filesystem error from defman-fs
    #[error(transparent)]
    Fs(#[from] defman_fs::Error),

    /// Transport error from defman-remote
    #[error(transparent)]
    Remote(#[from] defman_remote::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::MalformedDefinition { .. } => ErrorKind::Validation,
            Self::VerificationFailure { .. } => ErrorKind::VerificationFailure,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Config { .. } | Self::TomlDe(_) | Self::TomlSer(_) => ErrorKind::Config,
            Self::Fs(e) => match e {
                defman_fs::Error::LockContention { .. } => ErrorKind::LockContention,
                defman_fs::Error::ConfigParse { .. }
                | defman_fs::Error::ConfigSerialize { .. }
                | defman_fs::Error::UnsupportedFormat { .. } => ErrorKind::Config,
                e if e.is_validation() => ErrorKind::Validation,
                _ => ErrorKind::Io,
            },
            Self::Remote(_) => ErrorKind::Transport,
            Self::RollbackFailed { .. } | Self::Task(_) | Self::Io(_) | Self::Json(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Whether the same operation may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_retryable(),
            _ => matches!(
                self.kind(),
                ErrorKind::LockContention | ErrorKind::Timeout | ErrorKind::Conflict
            ),
        }
    }

    /// Ids of the artifacts this error is about, if any.
    pub fn failed_ids(&self) -> Vec<String> {
        match self {
            Self::PartialFailure { failed, .. } => failed.clone(),
            Self::VerificationFailure { id, .. } => vec![id.clone()],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn lock_contention_is_retryable() {
        let err = Error::from(defman_fs::Error::LockContention {
            key: "deploy:/srv".into(),
            waited: Duration::from_millis(10),
        });
        assert_eq!(err.kind(), ErrorKind::LockContention);
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_identifier_is_validation() {
        let fs_err = defman_fs::validate_identifier("../../etc/passwd", "Artifact id").unwrap_err();
        let err = Error::from(fs_err);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_retryability_follows_remote() {
        let err = Error::from(defman_remote::Error::Status {
            url: "https://example.invalid".into(),
            status: 503,
        });
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_retryable());
    }

    #[rstest]
    #[case(Error::Cancelled, ErrorKind::Cancelled)]
    #[case(Error::NotFound("job".into()), ErrorKind::NotFound)]
    #[case(Error::config("bad"), ErrorKind::Config)]
    fn kinds_are_stable(#[case] err: Error, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn partial_failure_lists_failed_ids() {
        let err = Error::PartialFailure {
            failed: vec!["b".into()],
            failed_count: 1,
            total: 3,
        };
        assert_eq!(err.failed_ids(), vec!["b".to_string()]);
        assert_eq!(err.to_string(), "1 of 3 failed: b");
    }
}
