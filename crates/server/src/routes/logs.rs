// crates/server/src/routes/logs.rs
//! GET /logs: recently captured log entries, oldest first.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use reel_observability::LogEntry;

use crate::state::AppState;

async fn recent_logs(State(state): State<Arc<AppState>>) -> Json<Vec<LogEntry>> {
    Json(state.logs.recent())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/logs", get(recent_logs))
}
