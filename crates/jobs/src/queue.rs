// crates/jobs/src/queue.rs
//! Bounded-parallelism queue for sub-tasks inside a single job.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::task::JobContext;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedTask {
    description: String,
    run: Box<dyn FnOnce(JobContext) -> BoxFuture + Send>,
}

/// Runs queued sub-tasks with at most `workers` in flight.
///
/// Each item is listed in the job's sub-tasks while it runs. Items still
/// queued when the job is cancelled are skipped.
pub struct TaskQueue {
    tx: Option<mpsc::Sender<QueuedTask>>,
    executor: JoinHandle<()>,
}

impl TaskQueue {
    pub fn new(ctx: &JobContext, queue_size: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let executor = tokio::spawn(execute(ctx.clone(), rx, workers.max(1)));
        Self {
            tx: Some(tx),
            executor,
        }
    }

    /// Enqueue a sub-task. Never blocks: when the queue is full the item is
    /// handed to a background send instead.
    pub fn add<F, Fut>(&self, description: impl Into<String>, f: F)
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(tx) = &self.tx else {
            return;
        };
        let item = QueuedTask {
            description: description.into(),
            run: Box::new(move |ctx| Box::pin(f(ctx))),
        };

        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    // Fails only once the executor has stopped on cancellation.
                    let _ = tx.send(item).await;
                });
            }
            Err(TrySendError::Closed(item)) => {
                tracing::debug!(task = %item.description, "Task queue closed, dropping sub-task");
            }
        }
    }

    /// Stop accepting work and wait for everything queued to finish.
    pub async fn close(mut self) {
        self.tx.take();
        if let Err(e) = (&mut self.executor).await {
            tracing::error!(error = %e, "Task queue executor failed");
        }
    }
}

async fn execute(ctx: JobContext, mut rx: mpsc::Receiver<QueuedTask>, workers: usize) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    while let Some(item) = rx.recv().await {
        if ctx.is_cancelled() {
            break;
        }
        let permit = tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let ctx = ctx.clone();
        running.spawn(async move {
            let _permit = permit;
            let progress = ctx.progress().clone();
            progress
                .execute_sub_task(item.description, (item.run)(ctx))
                .await;
        });

        // Reap finished workers as we go so the set stays small.
        while let Some(result) = running.try_join_next() {
            log_join_error(result);
        }
    }

    while let Some(result) = running.join_next().await {
        log_join_error(result);
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Queued sub-task panicked");
        }
    }
}
