// crates/jobs/src/task.rs
//! The unit of work run by the job manager.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::progress::Progress;
use crate::types::JobId;

/// Anything that can run asynchronously under a job.
///
/// Implementations must observe [`JobContext::cancelled`] (or poll
/// [`JobContext::is_cancelled`]) and return promptly once it fires; the
/// manager never aborts a task from the outside.
#[async_trait]
pub trait Task: Send + 'static {
    /// Label used when the task is submitted without an explicit description.
    fn description(&self) -> String {
        "Running task...".to_string()
    }

    async fn execute(self: Box<Self>, ctx: JobContext) -> anyhow::Result<()>;
}

/// Per-job handle passed to a running [`Task`].
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    cancel: CancellationToken,
    progress: Progress,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, cancel: CancellationToken, progress: Progress) -> Self {
        Self {
            job_id,
            cancel,
            progress,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job has been asked to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The job's token, for handing to code that takes one directly.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}

/// A [`Task`] built from a closure. See [`task_fn`].
pub struct TaskFn<F> {
    description: String,
    f: F,
}

/// Wrap a closure as a [`Task`].
///
/// ```ignore
/// manager.add("Cleaning generated files...", task_fn("clean", |ctx| async move {
///     ctx.progress().set_total(3);
///     Ok(())
/// }));
/// ```
pub fn task_fn<F, Fut>(description: impl Into<String>, f: F) -> TaskFn<F>
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    TaskFn {
        description: description.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn description(&self) -> String {
        self.description.clone()
    }

    async fn execute(self: Box<Self>, ctx: JobContext) -> anyhow::Result<()> {
        let this = *self;
        (this.f)(ctx).await
    }
}
