//! Request handlers

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use defman_core::{DeploymentJob, JobFilter, JobId, JobKind, JobStatus, ResolutionPlan};
use serde::{Deserialize, Serialize};

use crate::error::strip_paths;
use crate::{ApiError, ApiResult, AppState};

/// Answer to an accepted job submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub success: bool,
    pub job_id: JobId,
}

fn accepted(job_id: JobId) -> (StatusCode, Json<Accepted>) {
    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            success: true,
            job_id,
        }),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlanQuery {
    pub profile: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub job_id: JobId,
    /// False when the job had already finished.
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

/// Reject path segments that could address something outside their
/// collection, before any lookup.
fn check_segment(segment: &str) -> ApiResult<()> {
    if segment.is_empty()
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains("..")
    {
        return Err(ApiError::rejected(format!(
            "invalid path segment '{segment}'"
        )));
    }
    Ok(())
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    check_segment(raw)?;
    Ok(raw.parse()?)
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn sync_all(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let job_id = state.service.submit_sync(None)?;
    tracing::info!(job = %job_id, "Sync of all sources submitted");
    Ok(accepted(job_id))
}

pub async fn sync_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    check_segment(&source)?;
    let job_id = state.service.submit_sync(Some(source.clone()))?;
    tracing::info!(job = %job_id, %source, "Sync submitted");
    Ok(accepted(job_id))
}

pub async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    for id in &request.ids {
        check_segment(id)?;
    }
    // Unknown profiles fail here rather than inside the job.
    state.service.config().profile(request.profile.as_deref())?;
    let count = request.ids.len();
    let job_id = state.service.submit_deploy(request.ids, request.profile)?;
    tracing::info!(job = %job_id, ids = count, "Deploy submitted");
    Ok(accepted(job_id))
}

pub async fn autoconfig(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let job_id = state.service.submit_autoconfig()?;
    tracing::info!(job = %job_id, "Autoconfig submitted");
    Ok(accepted(job_id))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Json<Vec<DeploymentJob>> {
    let filter = JobFilter {
        kind: query.kind,
        status: query.status,
        active_only: query.active,
    };
    Json(state.service.jobs().list(filter).into_iter().map(redact_job).collect())
}

/// Job records leave the server without filesystem paths in their text.
pub fn redact_job(mut job: DeploymentJob) -> DeploymentJob {
    job.last_error = job.last_error.as_deref().map(strip_paths);
    job.summary = job.summary.as_deref().map(strip_paths);
    job
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentJob>> {
    let job_id = parse_job_id(&id)?;
    state
        .service
        .jobs()
        .status(job_id)
        .map(|job| Json(redact_job(job)))
        .ok_or_else(|| defman_core::Error::NotFound(format!("job {job_id}")).into())
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let job_id = parse_job_id(&id)?;
    let jobs = state.service.jobs();
    if jobs.status(job_id).is_none() {
        return Err(defman_core::Error::NotFound(format!("job {job_id}")).into());
    }
    let cancelled = jobs.cancel(job_id);
    tracing::info!(job = %job_id, cancelled, "Cancellation requested");
    Ok(Json(CancelResponse {
        success: true,
        job_id,
        cancelled,
    }))
}

pub async fn plan(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> ApiResult<Json<ResolutionPlan>> {
    let service = state.service.clone();
    let plan = tokio::task::spawn_blocking(move || service.plan(query.profile.as_deref()))
        .await
        .map_err(|e| defman_core::Error::Task(e.to_string()))??;
    Ok(Json(plan))
}
