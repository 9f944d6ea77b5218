//! Error types for defman-cli

use defman_core::{ErrorKind, JobId, JobKind, JobStatus};

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Errors that can occur in CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Error from defman-core
    #[error(transparent)]
    Core(#[from] defman_core::Error),

    /// A supervised job ended without completing
    #[error("{kind} job {job_id} {status}: {message}")]
    Job {
        job_id: JobId,
        kind: JobKind,
        status: JobStatus,
        error_kind: Option<ErrorKind>,
        message: String,
        failed_ids: Vec<String>,
    },

    /// The server could not be reached
    #[error("Cannot reach server: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body
    #[error("Server rejected request ({status}): {message}")]
    Server {
        status: u16,
        error_kind: ErrorKind,
        message: String,
    },

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// User-facing error with a message
    #[error("{message}")]
    User { message: String },
}

impl CliError {
    /// Create a new user error with the given message
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    /// Process exit code: 1 soft failure, 2 usage or validation, 3 contention
    /// or timeout.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Core(e) => code_for(e.kind()),
            Self::Job {
                status: JobStatus::TimedOut,
                ..
            } => 3,
            Self::Job { error_kind, .. } => error_kind.map_or(1, code_for),
            Self::Server { error_kind, .. } => code_for(*error_kind),
            Self::User { .. } => 2,
            Self::Http(_) | Self::Io(_) | Self::Json(_) => 1,
        }
    }

    /// Artifact ids named by the failure, if any.
    pub fn failed_ids(&self) -> Vec<String> {
        match self {
            Self::Core(e) => e.failed_ids(),
            Self::Job { failed_ids, .. } => failed_ids.clone(),
            _ => Vec::new(),
        }
    }
}

fn code_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Config => 2,
        ErrorKind::LockContention | ErrorKind::Timeout | ErrorKind::Conflict => 3,
        ErrorKind::Transport
        | ErrorKind::VerificationFailure
        | ErrorKind::PartialFailure
        | ErrorKind::Cancelled
        | ErrorKind::Io => 1,
    }
}
