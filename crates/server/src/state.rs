// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use reel_jobs::{JobManager, ManagerConfig};
use reel_observability::LogHub;

use crate::events::{EventBroker, DEFAULT_CLIENT_BUFFER};
use crate::scan::ScanNotifier;

/// Shared application state accessible from all route handlers.
///
/// Built once at startup and handed to every handler; nothing in the server
/// reaches for a global instead.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub jobs: JobManager,
    /// Fan-out to SSE clients.
    pub broker: Arc<EventBroker>,
    /// Captured log entries (`/logs` and `log.entries` events).
    pub logs: LogHub,
    pub scans: ScanNotifier,
}

impl AppState {
    pub fn new(manager: ManagerConfig, sse_buffer: usize, logs: LogHub) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            jobs: JobManager::new(manager),
            broker: Arc::new(EventBroker::new(sse_buffer)),
            logs,
            scans: ScanNotifier::new(),
        })
    }

    /// Default configuration with a private log hub.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(ManagerConfig::default(), DEFAULT_CLIENT_BUFFER, LogHub::new())
    }

    /// Connect the broker to the job manager, log hub and scan notifier.
    /// Must run inside the Tokio runtime, before serving traffic.
    pub fn start_events(&self) {
        self.broker.start(&self.jobs, &self.logs, &self.scans);
    }

    /// Stop event forwarding, disconnect SSE clients and cancel every job.
    pub fn shutdown(&self) {
        self.broker.stop();
        self.jobs.shutdown();
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
