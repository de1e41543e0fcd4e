//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric descriptions for jobs, SSE fan-out and API requests
//! - Helper functions for recording metrics

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    // Jobs (recorded by reel-jobs)
    describe_counter!("jobs_added_total", "Jobs submitted to the job manager");
    describe_counter!(
        "jobs_completed_total",
        "Jobs that reached a terminal state, by final status"
    );

    // SSE fan-out
    describe_gauge!("sse_clients", "Currently connected SSE clients");
    describe_counter!(
        "sse_events_broadcast_total",
        "Events offered to SSE clients, by event type"
    );
    describe_counter!(
        "sse_events_dropped_total",
        "Events dropped for a slow SSE client, by event type"
    );

    // Requests
    describe_counter!("api_requests_total", "Total number of API requests");
    describe_histogram!(
        "api_request_duration_seconds",
        "Duration of API requests in seconds"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_request(endpoint: &str, status: &str, duration: Duration) {
    counter!("api_requests_total", "endpoint" => endpoint.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("api_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_sse_clients(count: usize) {
    gauge!("sse_clients").set(count as f64);
}

pub fn record_sse_broadcast(event_type: &'static str) {
    counter!("sse_events_broadcast_total", "event" => event_type).increment(1);
}

pub fn record_sse_dropped(event_type: &'static str) {
    counter!("sse_events_dropped_total", "event" => event_type).increment(1);
}

/// Times one API request from arrival to response.
pub struct RequestTimer {
    endpoint: String,
    start: Instant,
}

impl RequestTimer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            start: Instant::now(),
        }
    }

    pub fn finish(self, status: StatusCode) {
        record_request(&self.endpoint, status.as_str(), self.start.elapsed());
    }
}

/// Middleware recording `api_requests_total` and the duration histogram for
/// every routed request, labelled by route template.
///
/// For `/events` the duration covers the handshake only; the stream itself
/// outlives the response.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let timer = RequestTimer::new(endpoint);
    let response = next.run(req).await;
    timer.finish(response.status());
    response
}
