// crates/server/src/routes/jobs.rs
//! API routes for background job management.
//!
//! - GET  /jobs: all tracked jobs, oldest submission first
//! - GET  /jobs/{id}: one job, 404 if unknown
//! - POST /jobs/{id}/stop: request cancellation (always `true`)
//! - POST /jobs/stop-all: request cancellation of every job

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use reel_jobs::JobModel;

use crate::error::{parse_job_id, ApiError, ApiResult};
use crate::state::AppState;

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobModel>> {
    let jobs: Vec<JobModel> = state.jobs.get_queue().iter().map(JobModel::from).collect();
    Json(jobs)
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobModel>> {
    let id = parse_job_id(&id)?;
    state
        .jobs
        .get_job(id)
        .map(|job| Json(JobModel::from(job)))
        .ok_or(ApiError::JobNotFound(id))
}

/// Unknown and finished jobs are not an error: stopping is idempotent.
async fn stop_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<bool>> {
    let id = parse_job_id(&id)?;
    state.jobs.cancel_job(id);
    Ok(Json(true))
}

async fn stop_all_jobs(State(state): State<Arc<AppState>>) -> Json<bool> {
    state.jobs.cancel_all();
    Json(true)
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stop-all", post(stop_all_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/stop", post(stop_job))
}
