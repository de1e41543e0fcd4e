// crates/server/src/lib.rs
//! Reel server library.
//!
//! Axum HTTP server exposing the background job manager: REST endpoints to
//! query and stop jobs, and a Server-Sent Events stream that pushes job,
//! log and scan-complete events to every connected client.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod routes;
pub mod scan;
pub mod state;

pub use config::ServerConfig;
pub use error::*;
pub use metrics::init_metrics;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, events, logs, operations, metrics)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint_response_structure() {
        let app = create_app(AppState::with_defaults());
        let (status, body) = get(app, "/api/v1/health").await;

        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
        assert_eq!(json["sse_clients"], 0);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let app = create_app(AppState::with_defaults());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response.headers().get("access-control-allow-origin");
        assert_eq!(allow_origin.unwrap(), "*");
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let app = create_app(AppState::with_defaults());

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/v1/jobs/stop-all")
                    .header("Origin", "http://localhost:3000")
                    .header("Access-Control-Request-Method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_404_for_unknown_route() {
        let app = create_app(AppState::with_defaults());
        let (status, _body) = get(app, "/api/v1/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_404_without_version_prefix() {
        let app = create_app(AppState::with_defaults());
        let (status, _body) = get(app, "/api/jobs").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_multiple_requests() {
        let app = create_app(AppState::with_defaults());

        let (status1, _) = get(app.clone(), "/api/v1/health").await;
        assert_eq!(status1, StatusCode::OK);

        let (status2, _) = get(app, "/api/v1/jobs").await;
        assert_eq!(status2, StatusCode::OK);
    }
}
