// crates/jobs/src/subscription.rs
//! In-process pub/sub for job lifecycle events.
//!
//! Each [`ManagerSubscription`] bundles three bounded channels. The manager
//! writes with `try_send`, so a subscriber that stops reading loses events
//! instead of stalling job execution.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::types::Job;

/// A job lifecycle notification carrying a full snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Added(Job),
    Updated(Job),
    Removed(Job),
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Added(job) | JobEvent::Updated(job) | JobEvent::Removed(job) => job,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            JobEvent::Added(_) => "added",
            JobEvent::Updated(_) => "updated",
            JobEvent::Removed(_) => "removed",
        }
    }
}

/// Receiving half handed out by [`JobManager::subscribe`](crate::JobManager::subscribe).
///
/// Channels close once the subscription's token is cancelled and the manager
/// has delivered its next event (the registry prunes lazily).
#[derive(Debug)]
pub struct ManagerSubscription {
    pub new_job: mpsc::Receiver<Job>,
    pub updated_job: mpsc::Receiver<Job>,
    pub removed_job: mpsc::Receiver<Job>,
}

impl ManagerSubscription {
    /// Receive the next event from any of the three channels.
    ///
    /// When several channels are ready, additions win over updates and
    /// updates over removals, which keeps a job's `Added` ahead of its first
    /// `Updated`. Returns `None` once every channel is closed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        tokio::select! {
            biased;
            Some(job) = self.new_job.recv() => Some(JobEvent::Added(job)),
            Some(job) = self.updated_job.recv() => Some(JobEvent::Updated(job)),
            Some(job) = self.removed_job.recv() => Some(JobEvent::Removed(job)),
            else => None,
        }
    }
}

struct Subscriber {
    new_job: mpsc::Sender<Job>,
    updated_job: mpsc::Sender<Job>,
    removed_job: mpsc::Sender<Job>,
    cancel: CancellationToken,
}

impl Subscriber {
    /// Returns `false` when the subscriber is gone and should be pruned.
    fn deliver(&self, event: &JobEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let tx = match event {
            JobEvent::Added(_) => &self.new_job,
            JobEvent::Updated(_) => &self.updated_job,
            JobEvent::Removed(_) => &self.removed_job,
        };

        match tx.try_send(event.job().clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    job_id = event.job().id,
                    event = event.label(),
                    "Job subscriber is full, dropping event"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Registry of live subscribers. Guarded by its own lock inside the manager.
pub(crate) struct SubscriberRegistry {
    subscribers: Vec<Subscriber>,
    buffer: usize,
}

impl SubscriberRegistry {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            buffer: buffer.max(1),
        }
    }

    pub(crate) fn subscribe(&mut self, cancel: CancellationToken) -> ManagerSubscription {
        let (new_tx, new_rx) = mpsc::channel(self.buffer);
        let (updated_tx, updated_rx) = mpsc::channel(self.buffer);
        let (removed_tx, removed_rx) = mpsc::channel(self.buffer);

        self.subscribers.push(Subscriber {
            new_job: new_tx,
            updated_job: updated_tx,
            removed_job: removed_tx,
            cancel,
        });

        ManagerSubscription {
            new_job: new_rx,
            updated_job: updated_rx,
            removed_job: removed_rx,
        }
    }

    /// Deliver events in order to every subscriber, pruning dead ones.
    pub(crate) fn deliver(&mut self, events: &[JobEvent]) {
        if events.is_empty() {
            return;
        }
        self.subscribers
            .retain(|subscriber| events.iter().all(|event| subscriber.deliver(event)));
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(id: u64) -> Job {
        Job::new(id, format!("job {id}"), Utc::now())
    }

    #[tokio::test]
    async fn test_events_route_to_matching_channels() {
        let mut registry = SubscriberRegistry::new(8);
        let mut sub = registry.subscribe(CancellationToken::new());

        registry.deliver(&[
            JobEvent::Added(job(1)),
            JobEvent::Updated(job(1)),
            JobEvent::Removed(job(1)),
        ]);

        assert_eq!(sub.new_job.try_recv().unwrap().id, 1);
        assert_eq!(sub.updated_job.try_recv().unwrap().id, 1);
        assert_eq!(sub.removed_job.try_recv().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_is_pruned_and_closed() {
        let mut registry = SubscriberRegistry::new(8);
        let token = CancellationToken::new();
        let mut sub = registry.subscribe(token.clone());
        assert_eq!(registry.len(), 1);

        token.cancel();
        registry.deliver(&[JobEvent::Added(job(1))]);

        assert_eq!(registry.len(), 0);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let mut registry = SubscriberRegistry::new(8);
        let sub = registry.subscribe(CancellationToken::new());
        drop(sub);

        registry.deliver(&[JobEvent::Updated(job(3))]);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_but_stays_registered() {
        let mut registry = SubscriberRegistry::new(1);
        let mut sub = registry.subscribe(CancellationToken::new());

        registry.deliver(&[JobEvent::Updated(job(1)), JobEvent::Updated(job(2))]);

        assert_eq!(registry.len(), 1);
        assert_eq!(sub.updated_job.try_recv().unwrap().id, 1);
        assert!(sub.updated_job.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recv_prefers_additions() {
        let mut registry = SubscriberRegistry::new(8);
        let mut sub = registry.subscribe(CancellationToken::new());

        // Update lands in its channel first, but the addition is read first.
        registry.deliver(&[JobEvent::Updated(job(7))]);
        registry.deliver(&[JobEvent::Added(job(7))]);

        assert!(matches!(sub.recv().await, Some(JobEvent::Added(_))));
        assert!(matches!(sub.recv().await, Some(JobEvent::Updated(_))));
    }
}
