// crates/server/src/routes/operations.rs
//! Operations that run as background jobs.
//!
//! - POST /metadata/scan: scan library folders, returns `{"job_id": "<id>"}`

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::scan::ScanTask;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobSubmitted {
    pub job_id: String,
}

async fn start_scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<JobSubmitted>> {
    if request.paths.is_empty() {
        return Err(ApiError::BadRequest("paths must not be empty".to_string()));
    }

    let task = ScanTask::new(request.paths, state.scans.clone());
    let id = state.jobs.run_single_task(task);
    tracing::info!(job_id = id, "Library scan queued");

    Ok(Json(JobSubmitted {
        job_id: id.to_string(),
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metadata/scan", post(start_scan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use reel_jobs::JobStatus;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn post_scan(state: Arc<AppState>, body: serde_json::Value) -> axum::response::Response {
        router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/metadata/scan")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_returns_job_id_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"").unwrap();

        let state = AppState::with_defaults();
        let response = post_scan(
            state.clone(),
            serde_json::json!({ "paths": [dir.path()] }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let submitted: JobSubmitted = serde_json::from_slice(&body).unwrap();
        let id = submitted.job_id.parse().unwrap();

        let job = tokio::time::timeout(Duration::from_secs(5), state.jobs.wait(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.description, "Scanning...");
    }

    #[tokio::test]
    async fn test_empty_paths_is_400() {
        let state = AppState::with_defaults();
        let response = post_scan(state.clone(), serde_json::json!({ "paths": [] })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.jobs.get_queue().is_empty());
    }
}
