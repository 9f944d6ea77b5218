//! Error types for defman-server

use std::net::SocketAddr;
use std::sync::LazyLock;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use defman_core::ErrorKind;
use regex::Regex;
use serde::Serialize;

/// Result type for request handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors returned to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] defman_core::Error),

    /// A request rejected before reaching the engine.
    #[error("{message}")]
    Rejected { message: String },
}

impl ApiError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(e) => e.kind(),
            Self::Rejected { .. } => ErrorKind::Validation,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::LockContention => StatusCode::LOCKED,
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error_kind: ErrorKind,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let full = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %full, kind = %self.kind(), "Request failed");
        } else {
            tracing::warn!(error = %full, kind = %self.kind(), "Request rejected");
        }
        let body = ErrorBody {
            success: false,
            error_kind: self.kind(),
            message: strip_paths(&full),
        };
        (status, Json(body)).into_response()
    }
}

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\b[A-Za-z]:)?(?:[\\/][\w.\-]+){2,}[\\/]?").expect("path pattern is valid")
});

/// Replace filesystem paths in `message` with `<path>`.
pub fn strip_paths(message: &str) -> String {
    PATH_RE.replace_all(message, "<path>").into_owned()
}

/// Errors that stop the server process
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] defman_core::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
