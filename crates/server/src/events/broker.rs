// crates/server/src/events/broker.rs
//! Fan-out of [`SseEvent`]s to every connected SSE client.
//!
//! Three forwarding tasks feed the broker: job lifecycle events from the
//! [`JobManager`], log batches from the [`LogHub`] and scan-complete
//! notifications. [`EventBroker::broadcast`] never blocks: a client whose
//! buffer is full simply misses that event. Canonical job state is always
//! available from the REST endpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reel_jobs::{JobManager, ManagerSubscription};
use reel_observability::{LogEntry, LogHub};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::SseEvent;
use crate::metrics;
use crate::scan::ScanNotifier;

pub const DEFAULT_CLIENT_BUFFER: usize = 64;

pub type ClientId = u64;

pub struct EventBroker {
    clients: RwLock<HashMap<ClientId, mpsc::Sender<SseEvent>>>,
    next_client: AtomicU64,
    buffer: usize,
    /// Token owned by the running forwarders; `None` while stopped.
    forwarders: Mutex<Option<CancellationToken>>,
}

/// One client's view of the broker. Dropping it unsubscribes.
pub struct ClientSubscription {
    id: ClientId,
    rx: mpsc::Receiver<SseEvent>,
    broker: Arc<EventBroker>,
}

impl ClientSubscription {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Next event, or `None` once the broker has disconnected this client.
    pub async fn recv(&mut self) -> Option<SseEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SseEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ClientSubscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

impl EventBroker {
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_client: AtomicU64::new(1),
            buffer: buffer.max(1),
            forwarders: Mutex::new(None),
        }
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<ClientId, mpsc::Sender<SseEvent>>> {
        self.clients.read().unwrap_or_else(|poisoned| {
            tracing::error!("SSE client map lock poisoned");
            poisoned.into_inner()
        })
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<ClientId, mpsc::Sender<SseEvent>>> {
        self.clients.write().unwrap_or_else(|poisoned| {
            tracing::error!("SSE client map lock poisoned");
            poisoned.into_inner()
        })
    }

    fn lock_forwarders(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.forwarders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new client with its own bounded buffer.
    pub fn subscribe(self: &Arc<Self>) -> ClientSubscription {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let count = {
            let mut clients = self.write_clients();
            clients.insert(id, tx);
            clients.len()
        };
        metrics::record_sse_clients(count);
        tracing::debug!(client_id = id, clients = count, "SSE client connected");

        ClientSubscription {
            id,
            rx,
            broker: Arc::clone(self),
        }
    }

    /// Remove a client and close its channel. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ClientId) {
        let (removed, count) = {
            let mut clients = self.write_clients();
            let removed = clients.remove(&id).is_some();
            (removed, clients.len())
        };
        if removed {
            metrics::record_sse_clients(count);
            tracing::debug!(client_id = id, clients = count, "SSE client disconnected");
        }
    }

    /// Offer `event` to every client without waiting on any of them.
    pub fn broadcast(&self, event: SseEvent) {
        let kind = event.event_type();
        let mut closed = Vec::new();
        {
            let clients = self.read_clients();
            for (&id, tx) in clients.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(client_id = id, event_type = %kind, "Dropping SSE event for slow client");
                        metrics::record_sse_dropped(kind.as_str());
                    }
                    Err(TrySendError::Closed(_)) => closed.push(id),
                }
            }
        }
        metrics::record_sse_broadcast(kind.as_str());

        for id in closed {
            self.unsubscribe(id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.read_clients().len()
    }

    /// Spawn the three forwarding tasks. A second call while running is a
    /// no-op.
    pub fn start(self: &Arc<Self>, jobs: &JobManager, logs: &LogHub, scans: &ScanNotifier) {
        let mut forwarders = self.lock_forwarders();
        if forwarders.is_some() {
            tracing::warn!("Event broker already started");
            return;
        }

        let token = CancellationToken::new();
        tokio::spawn(forward_job_events(
            Arc::clone(self),
            jobs.subscribe(token.child_token()),
            token.clone(),
        ));
        tokio::spawn(forward_log_events(
            Arc::clone(self),
            logs.subscribe_to_log(token.child_token()),
            token.clone(),
        ));
        tokio::spawn(forward_scan_complete(
            Arc::clone(self),
            scans.subscribe(),
            token.clone(),
        ));

        *forwarders = Some(token);
        tracing::info!("Event broker started");
    }

    /// Stop the forwarders and disconnect every client, which ends their
    /// SSE streams. No-op when not started.
    pub fn stop(&self) {
        let Some(token) = self.lock_forwarders().take() else {
            return;
        };
        token.cancel();

        self.write_clients().clear();
        metrics::record_sse_clients(0);
        tracing::info!("Event broker stopped");
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_BUFFER)
    }
}

async fn forward_job_events(
    broker: Arc<EventBroker>,
    mut subscription: ManagerSubscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => broker.broadcast(SseEvent::from(event)),
                None => break,
            },
        }
    }
    tracing::debug!("Job event forwarder exited");
}

async fn forward_log_events(
    broker: Arc<EventBroker>,
    mut batches: mpsc::Receiver<Vec<LogEntry>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(entries) if entries.is_empty() => {}
                Some(entries) => broker.broadcast(SseEvent::LogEntries(entries)),
                None => break,
            },
        }
    }
}

async fn forward_scan_complete(
    broker: Arc<EventBroker>,
    mut completions: broadcast::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            completion = completions.recv() => match completion {
                // Missed notifications collapse into one.
                Ok(()) | Err(RecvError::Lagged(_)) => broker.broadcast(SseEvent::ScanComplete),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, JobStatusUpdateType};
    use reel_jobs::task_fn;
    use std::time::Duration;

    async fn next(sub: &mut ClientSubscription) -> SseEvent {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let broker = Arc::new(EventBroker::default());
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();
        let mut c = broker.subscribe();
        assert_eq!(broker.client_count(), 3);

        broker.broadcast(SseEvent::ScanComplete);

        for sub in [&mut a, &mut b, &mut c] {
            assert_eq!(next(sub).await, SseEvent::ScanComplete);
        }
    }

    #[tokio::test]
    async fn test_full_client_misses_event_others_do_not() {
        let broker = Arc::new(EventBroker::new(64));
        let mut slow = broker.subscribe();
        let mut fast = broker.subscribe();

        let mut fast_seen = 0;
        for i in 0..65 {
            broker.broadcast(SseEvent::LogEntries(vec![LogEntry::new("info", i.to_string())]));
            // Drain the fast client as we go so only the slow one fills up.
            let SseEvent::LogEntries(entries) = next(&mut fast).await else {
                panic!("unexpected event");
            };
            assert_eq!(entries[0].message, i.to_string());
            fast_seen += 1;
        }
        assert_eq!(fast_seen, 65);

        let mut slow_seen = Vec::new();
        while let Some(SseEvent::LogEntries(entries)) = slow.try_recv() {
            slow_seen.push(entries[0].message.clone());
        }
        assert_eq!(slow_seen.len(), 64);
        assert_eq!(slow_seen.last().map(String::as_str), Some("63"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = Arc::new(EventBroker::default());
        let sub = broker.subscribe();
        let id = sub.id();
        let mut other = broker.subscribe();

        drop(sub);
        assert_eq!(broker.client_count(), 1);

        // Repeated unsubscribe and later broadcasts are harmless.
        broker.unsubscribe(id);
        broker.broadcast(SseEvent::ScanComplete);
        assert_eq!(next(&mut other).await, SseEvent::ScanComplete);
        assert_eq!(broker.client_count(), 1);
    }

    #[tokio::test]
    async fn test_forwards_job_log_and_scan_sources() {
        let broker = Arc::new(EventBroker::default());
        let jobs = JobManager::default();
        let logs = LogHub::new();
        let scans = ScanNotifier::new();
        broker.start(&jobs, &logs, &scans);
        let mut sub = broker.subscribe();

        let id = jobs.add("Generating...", task_fn("generate", |_ctx| async { Ok(()) }));
        let mut kinds = Vec::new();
        while kinds.last() != Some(&"FINISHED".to_string()) {
            let SseEvent::Job(update) = next(&mut sub).await else {
                panic!("expected job event");
            };
            assert_eq!(update.job.id, id.to_string());
            if update.kind == JobStatusUpdateType::Add {
                assert_eq!(update.job.status.as_str(), "READY");
            }
            kinds.push(update.job.status.as_str().to_string());
        }
        assert_eq!(kinds, vec!["READY", "RUNNING", "FINISHED"]);

        logs.record(LogEntry::new("info", "library updated"));
        logs.flush();
        let event = next(&mut sub).await;
        assert_eq!(event.event_type(), EventType::LogEntries);

        scans.notify_complete();
        assert_eq!(next(&mut sub).await, SseEvent::ScanComplete);

        broker.stop();
    }

    #[tokio::test]
    async fn test_stop_disconnects_clients_and_is_idempotent() {
        let broker = Arc::new(EventBroker::default());
        broker.stop();

        let jobs = JobManager::default();
        let logs = LogHub::new();
        let scans = ScanNotifier::new();
        broker.start(&jobs, &logs, &scans);
        broker.start(&jobs, &logs, &scans);

        let mut sub = broker.subscribe();
        broker.stop();
        broker.stop();

        let closed = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(broker.client_count(), 0);
    }
}
