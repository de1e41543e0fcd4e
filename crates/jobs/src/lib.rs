// crates/jobs/src/lib.rs
//! Background job system for long-running async operations.
//!
//! Provides:
//! - `JobManager`: assigns ids, runs tasks, tracks status, cancels
//! - `Task` / `task_fn`: the unit of work and a closure adapter
//! - `Progress`: progress and sub-task reporting from inside a task
//! - `ManagerSubscription`: in-process job add/update/remove events
//! - `TaskQueue`: bounded parallel sub-tasks within one job
//! - `JobModel`: the JSON wire shape of a job

pub mod manager;
pub mod model;
pub mod progress;
pub mod queue;
pub mod subscription;
pub mod task;
pub mod types;

pub use manager::{JobManager, ManagerConfig};
pub use model::JobModel;
pub use progress::Progress;
pub use queue::TaskQueue;
pub use subscription::{JobEvent, ManagerSubscription};
pub use task::{task_fn, JobContext, Task, TaskFn};
pub use types::{Job, JobId, JobStatus, UnknownJobStatus, PROGRESS_INDETERMINATE};

pub use tokio_util::sync::CancellationToken;
