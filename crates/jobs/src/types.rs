// crates/jobs/src/types.rs
//! Core job records and the status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a job. Allocated from a strictly increasing counter
/// and never reused for the lifetime of the process.
pub type JobId = u64;

/// Progress sentinel meaning "indeterminate / not reported".
pub const PROGRESS_INDETERMINATE: f64 = -1.0;

/// Status of a tracked job.
///
/// ```text
/// Ready ──► Running ──► Finished | Failed
///   │          │
///   │          └──► Stopping ──► Cancelled
///   └──────────────────────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Ready,
    Running,
    Finished,
    Stopping,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Ready,
        JobStatus::Running,
        JobStatus::Finished,
        JobStatus::Stopping,
        JobStatus::Cancelled,
        JobStatus::Failed,
    ];

    /// Terminal statuses accept no further transition or cancellation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    /// Wire spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "READY",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Stopping => "STOPPING",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when decoding a status string outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status: {0:?}")]
pub struct UnknownJobStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownJobStatus(s.to_string()))
    }
}

/// The tracked record of one task execution.
///
/// Owned by the [`JobManager`](crate::JobManager); everything handed out to
/// callers is a cloned snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub description: String,
    pub sub_tasks: Vec<String>,
    /// `[0, 1]`, or [`PROGRESS_INDETERMINATE`].
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub add_time: DateTime<Utc>,
    pub error: Option<String>,
}

impl Job {
    pub(crate) fn new(id: JobId, description: String, add_time: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Ready,
            description,
            sub_tasks: Vec::new(),
            progress: PROGRESS_INDETERMINATE,
            start_time: None,
            end_time: None,
            add_time,
            error: None,
        }
    }

    /// Reported progress, or `None` while indeterminate.
    pub fn progress(&self) -> Option<f64> {
        (self.progress != PROGRESS_INDETERMINATE).then_some(self.progress)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    // -- Transitions ----------------------------------------------------------
    //
    // Each returns `false` and leaves the job untouched when the transition is
    // not allowed from the current status.

    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Ready {
            return false;
        }
        self.status = JobStatus::Running;
        self.start_time = Some(now);
        true
    }

    pub(crate) fn stop(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Stopping;
        true
    }

    pub(crate) fn finish(&mut self, now: DateTime<Utc>) -> bool {
        self.terminate(JobStatus::Finished, now)
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        self.terminate(JobStatus::Cancelled, now)
    }

    pub(crate) fn fail(&mut self, error: String, now: DateTime<Utc>) -> bool {
        if !self.terminate(JobStatus::Failed, now) {
            return false;
        }
        self.error = Some(error);
        true
    }

    fn terminate(&mut self, status: JobStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(now);
        // Progress narration belongs to the running task.
        self.sub_tasks.clear();
        true
    }
}
