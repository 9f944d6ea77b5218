//! HTTP control plane for defman
//!
//! Every mutating endpoint submits a job to the service's
//! [`JobManager`](defman_core::JobManager) and answers `202 Accepted` with the
//! job id; clients poll `GET /jobs/{id}` or follow `GET /events`.
//!
//! | Method | Path | Action |
//! |---|---|---|
//! | `POST` | `/sync` | sync every enabled source |
//! | `POST` | `/sync/{source}` | sync one source |
//! | `POST` | `/deploy` | deploy `{ids, profile}` (every winner when `ids` is empty) |
//! | `POST` | `/autoconfig` | detect the stack, sync and deploy |
//! | `GET` | `/jobs` | list jobs (`?kind=&status=&active=`) |
//! | `GET` | `/jobs/{id}` | one job |
//! | `DELETE` | `/jobs/{id}` | request cancellation |
//! | `GET` | `/plan` | current resolution plan (`?profile=`) |
//! | `GET` | `/events` | status events as server-sent events |
//! | `GET` | `/health` | liveness |

pub mod error;
pub mod events;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use defman_core::{BroadcastSink, DeployService};

pub use error::{ApiError, ApiResult, ServerError};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<DeployService>,
    pub events: BroadcastSink,
}

impl AppState {
    pub fn new(service: Arc<DeployService>, events: BroadcastSink) -> Self {
        Self { service, events }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/sync", post(routes::sync_all))
        .route("/sync/{source}", post(routes::sync_source))
        .route("/deploy", post(routes::deploy))
        .route("/autoconfig", post(routes::autoconfig))
        .route("/jobs", get(routes::list_jobs))
        .route("/jobs/{id}", get(routes::get_job).delete(routes::cancel_job))
        .route("/plan", get(routes::plan))
        .route("/events", get(events::stream))
        .with_state(state)
}
