// crates/server/src/routes/events.rs
//! GET /events: live event stream over Server-Sent Events.
//!
//! | Event           | Data                                   |
//! |-----------------|----------------------------------------|
//! | `connected`     | `{}` once, on connect                  |
//! | `job.add`       | `{"type":"ADD","job":{...}}`           |
//! | `job.update`    | `{"type":"UPDATE","job":{...}}`        |
//! | `job.remove`    | `{"type":"REMOVE","job":{...}}`        |
//! | `log.entries`   | `[{"time","level","message"}, ...]`    |
//! | `scan.complete` | `null`                                 |
//!
//! Delivery is best effort. A client that falls more than its buffer behind
//! misses events and should refetch `/jobs`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::events::broker::ClientId;
use crate::events::SseEvent;
use crate::state::AppState;

/// Disables response buffering in nginx-style proxies.
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

fn encode(event: &SseEvent, client_id: ClientId) -> Option<Event> {
    match event.to_sse() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(
                client_id,
                event_type = %event.event_type(),
                error = %e,
                "Failed to encode SSE event, skipping"
            );
            None
        }
    }
}

/// The subscription lives inside the stream, so the client is unsubscribed
/// whenever axum drops the response body, including on disconnect.
async fn event_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut subscription = state.broker.subscribe();

    let stream = async_stream::stream! {
        let client_id = subscription.id();
        if let Some(frame) = encode(&SseEvent::Connected, client_id) {
            yield Ok::<Event, Infallible>(frame);
        }

        while let Some(event) = subscription.recv().await {
            if let Some(frame) = encode(&event, client_id) {
                yield Ok(frame);
            }
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(stream),
    )
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(event_stream))
}
