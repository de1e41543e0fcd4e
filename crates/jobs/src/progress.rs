// crates/jobs/src/progress.rs
//! Progress reporting for a running job.
//!
//! Counter updates are folded into a single percentage and written through
//! to the job record. Progress-only changes are throttled per job by the
//! manager; sub-task changes are always published.

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::manager::Shared;
use crate::types::{JobId, PROGRESS_INDETERMINATE};

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    processed: u64,
    indefinite: bool,
}

impl Counters {
    fn percent(&self) -> f64 {
        if self.indefinite || self.total == 0 {
            return PROGRESS_INDETERMINATE;
        }
        (self.processed as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Cloneable progress handle bound to one job.
#[derive(Clone)]
pub struct Progress {
    job_id: JobId,
    shared: Arc<Shared>,
    counters: Arc<Mutex<Counters>>,
}

impl Progress {
    pub(crate) fn new(job_id: JobId, shared: Arc<Shared>) -> Self {
        Self {
            job_id,
            shared,
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.update(|c| c.total = total);
    }

    pub fn add_total(&self, n: u64) {
        self.update(|c| c.total = c.total.saturating_add(n));
    }

    pub fn set_processed(&self, processed: u64) {
        self.update(|c| c.processed = processed);
    }

    pub fn add_processed(&self, n: u64) {
        self.update(|c| c.processed = c.processed.saturating_add(n));
    }

    pub fn increment(&self) {
        self.add_processed(1);
    }

    /// Report a percentage directly, bypassing the counters.
    pub fn set_percent(&self, percent: f64) {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 1.0)
        };
        self.shared.set_progress(self.job_id, percent);
    }

    /// Mark progress as not reported.
    pub fn indefinite(&self) {
        self.update(|c| c.indefinite = true);
    }

    /// Resume reporting from the counters.
    pub fn definite(&self) {
        self.update(|c| c.indefinite = false);
    }

    /// Run `fut` with `description` listed in the job's sub-tasks.
    ///
    /// The entry is removed when the future completes, errors, or is dropped.
    pub async fn execute_sub_task<F, T>(&self, description: impl Into<String>, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let description = description.into();
        self.shared.push_sub_task(self.job_id, description.clone());
        let _guard = SubTaskGuard {
            progress: self,
            description,
        };
        fut.await
    }

    /// Lock order: counters, then the manager's locks. Publishing under the
    /// counters guard keeps concurrent updates from landing out of order.
    fn update(&self, f: impl FnOnce(&mut Counters)) {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(job_id = self.job_id, "Progress counters mutex poisoned");
                poisoned.into_inner()
            }
        };
        f(&mut counters);
        self.shared.set_progress(self.job_id, counters.percent());
    }
}

struct SubTaskGuard<'a> {
    progress: &'a Progress,
    description: String,
}

impl Drop for SubTaskGuard<'_> {
    fn drop(&mut self) {
        self.progress
            .shared
            .remove_sub_task(self.progress.job_id, &self.description);
    }
}
