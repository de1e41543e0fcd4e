//! API route handlers for the reel server.

pub mod events;
pub mod health;
pub mod jobs;
pub mod logs;
pub mod metrics;
pub mod operations;

use std::sync::Arc;

use axum::{middleware, Router};

use crate::state::AppState;

/// Create the combined router: API routes under `/api/v1` plus `/metrics`.
///
/// Every `/api/v1` route is counted and timed; `/metrics` itself is not.
///
/// Routes:
/// - GET  /api/v1/health - Health check
/// - GET  /api/v1/jobs - All tracked jobs in queue order
/// - GET  /api/v1/jobs/{id} - One job
/// - POST /api/v1/jobs/{id}/stop - Cancel a job
/// - POST /api/v1/jobs/stop-all - Cancel every job
/// - GET  /api/v1/events - SSE stream of job, log and scan events
/// - GET  /api/v1/logs - Recent log entries
/// - POST /api/v1/metadata/scan - Start a library scan job
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(events::router())
        .merge(logs::router())
        .merge(operations::router())
        .route_layer(middleware::from_fn(crate::metrics::track_requests));

    Router::new()
        .nest("/api/v1", v1)
        .merge(metrics::router())
        .with_state(state)
}
