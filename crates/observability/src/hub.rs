// crates/observability/src/hub.rs
//! In-process log fan-out.
//!
//! Captured entries accumulate until the next flush, then go out as one batch
//! to every subscriber. The hub also keeps the most recent entries around for
//! the `/logs` endpoint.
//!
//! Nothing in this module may emit `tracing` events: the capture layer calls
//! into the hub from inside the subscriber, and re-entering it would deadlock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Entries kept for `recent()`.
pub const RECENT_CAPACITY: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Batches a slow subscriber may fall behind before further batches are dropped.
const SUBSCRIBER_BUFFER: usize = 16;

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            level: level.into(),
            message: message.into(),
        }
    }
}

struct LogSubscriber {
    tx: mpsc::Sender<Vec<LogEntry>>,
    stop: CancellationToken,
}

#[derive(Default)]
struct Inner {
    pending: Vec<LogEntry>,
    recent: VecDeque<LogEntry>,
    subscribers: Vec<LogSubscriber>,
}

/// Log subsystem shared by the capture layer, the event broker and the
/// `/logs` route.
#[derive(Clone, Default)]
pub struct LogHub {
    inner: Arc<Mutex<Inner>>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned hub still holds valid log entries.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receive every flushed batch until `stop` fires or the receiver is dropped.
    pub fn subscribe_to_log(&self, stop: CancellationToken) -> mpsc::Receiver<Vec<LogEntry>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock().subscribers.push(LogSubscriber { tx, stop });
        rx
    }

    pub fn record(&self, entry: LogEntry) {
        let mut inner = self.lock();
        if inner.recent.len() == RECENT_CAPACITY {
            inner.recent.pop_front();
        }
        inner.recent.push_back(entry.clone());
        inner.pending.push(entry);
    }

    /// Most recent entries, oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Send everything captured since the last flush as one batch.
    pub fn flush(&self) {
        let mut inner = self.lock();
        if inner.pending.is_empty() {
            inner.subscribers.retain(|s| !s.stop.is_cancelled() && !s.tx.is_closed());
            return;
        }

        let batch = std::mem::take(&mut inner.pending);
        inner.subscribers.retain(|s| {
            if s.stop.is_cancelled() {
                return false;
            }
            match s.tx.try_send(batch.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Flush on a fixed interval until `cancel` fires. Pending entries are
    /// flushed once more on the way out.
    pub fn spawn_flusher(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => hub.flush(),
                }
            }
            hub.flush();
        })
    }
}
