// crates/jobs/src/manager.rs
//! Central job manager: owns the job table, runs tasks and publishes
//! lifecycle events.
//!
//! Locking: the subscriber registry and the job table have separate mutexes.
//! Every transition takes the registry first, mutates the table, releases the
//! table and only then delivers. Readers (`get_job`, `get_queue`) touch the
//! table alone, so delivery never holds them up, while per-job event order
//! stays intact even though cancellation and the runner both write.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use metrics::counter;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::progress::Progress;
use crate::subscription::{JobEvent, ManagerSubscription, SubscriberRegistry};
use crate::task::{JobContext, Task};
use crate::types::{Job, JobId, JobStatus};

/// Tuning knobs for [`JobManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Terminal jobs kept queryable before the oldest is evicted.
    pub retained_jobs: usize,
    /// Capacity of each channel in a [`ManagerSubscription`].
    pub subscription_buffer: usize,
    /// Minimum spacing between progress-only update events for one job.
    pub progress_throttle: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retained_jobs: 10,
            subscription_buffer: 100,
            progress_throttle: Duration::from_millis(100),
        }
    }
}

struct Entry {
    job: Job,
    cancel: CancellationToken,
    /// Holds the final snapshot once the job is terminal.
    done: watch::Sender<Option<Job>>,
    last_emit: Option<Instant>,
}

struct JobTable {
    next_id: JobId,
    entries: HashMap<JobId, Entry>,
    /// Terminal jobs in the order they finished.
    graveyard: VecDeque<JobId>,
}

impl JobTable {
    /// Record that `id` went terminal and evict beyond `retained`.
    fn retire(&mut self, id: JobId, retained: usize) -> Vec<JobEvent> {
        self.graveyard.push_back(id);
        let mut removed = Vec::new();
        while self.graveyard.len() > retained {
            let Some(oldest) = self.graveyard.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                removed.push(JobEvent::Removed(entry.job));
            }
        }
        removed
    }
}

enum Outcome {
    Succeeded,
    Errored(String),
    Panicked(String),
}

pub(crate) struct Shared {
    config: ManagerConfig,
    root: CancellationToken,
    subscribers: Mutex<SubscriberRegistry>,
    table: Mutex<JobTable>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Mutex poisoned: {what}");
            poisoned.into_inner()
        }
    }
}

impl Shared {
    /// Run `f` against the table and deliver the events it returns.
    fn mutate<R>(&self, f: impl FnOnce(&mut JobTable) -> (Vec<JobEvent>, R)) -> R {
        let mut registry = lock(&self.subscribers, "job subscribers");
        let (events, out) = {
            let mut table = lock(&self.table, "job table");
            f(&mut table)
        };
        registry.deliver(&events);
        out
    }

    /// Ready -> Running. Returns `false` if the runner should not run the task.
    fn begin(&self, id: JobId) -> bool {
        let retained = self.config.retained_jobs;
        self.mutate(|table| {
            let Some(entry) = table.entries.get_mut(&id) else {
                return (Vec::new(), false);
            };
            let now = Utc::now();

            if entry.cancel.is_cancelled() && entry.job.cancel(now) {
                let snapshot = entry.job.clone();
                entry.done.send_replace(Some(snapshot.clone()));
                let mut events = vec![JobEvent::Updated(snapshot)];
                events.extend(table.retire(id, retained));
                return (events, false);
            }

            if !entry.job.start(now) {
                return (Vec::new(), false);
            }
            entry.last_emit = Some(Instant::now());
            (vec![JobEvent::Updated(entry.job.clone())], true)
        })
    }

    /// Record the task's outcome and move the job to a terminal status.
    fn complete(&self, id: JobId, outcome: Outcome) -> Option<Job> {
        let retained = self.config.retained_jobs;
        self.mutate(|table| {
            let Some(entry) = table.entries.get_mut(&id) else {
                return (Vec::new(), None);
            };
            let now = Utc::now();
            let stopping =
                entry.job.status == JobStatus::Stopping || entry.cancel.is_cancelled();

            let mut events = Vec::new();
            let changed = match outcome {
                Outcome::Panicked(message) => entry.job.fail(message, now),
                _ if stopping => {
                    // Token fired without cancel_job (shutdown racing a new
                    // job): still pass through Stopping.
                    if entry.job.stop() {
                        events.push(JobEvent::Updated(entry.job.clone()));
                    }
                    entry.job.cancel(now)
                }
                Outcome::Succeeded => entry.job.finish(now),
                Outcome::Errored(error) => entry.job.fail(error, now),
            };
            if !changed {
                return (events, None);
            }

            let snapshot = entry.job.clone();
            entry.done.send_replace(Some(snapshot.clone()));
            events.push(JobEvent::Updated(snapshot.clone()));
            events.extend(table.retire(id, retained));
            (events, Some(snapshot))
        })
    }

    pub(crate) fn set_progress(&self, id: JobId, percent: f64) {
        let throttle = self.config.progress_throttle;
        self.mutate(|table| {
            let Some(entry) = table.entries.get_mut(&id) else {
                return (Vec::new(), ());
            };
            if entry.job.is_terminal() || entry.job.progress == percent {
                return (Vec::new(), ());
            }
            entry.job.progress = percent;

            let now = Instant::now();
            let due = entry
                .last_emit
                .map_or(true, |last| now.duration_since(last) >= throttle);
            if !due {
                return (Vec::new(), ());
            }
            entry.last_emit = Some(now);
            (vec![JobEvent::Updated(entry.job.clone())], ())
        });
    }

    pub(crate) fn push_sub_task(&self, id: JobId, description: String) {
        self.edit_sub_tasks(id, |sub_tasks| {
            sub_tasks.push(description);
            true
        });
    }

    pub(crate) fn remove_sub_task(&self, id: JobId, description: &str) {
        self.edit_sub_tasks(id, |sub_tasks| {
            match sub_tasks.iter().position(|s| s == description) {
                Some(index) => {
                    sub_tasks.remove(index);
                    true
                }
                None => false,
            }
        });
    }

    fn edit_sub_tasks(&self, id: JobId, edit: impl FnOnce(&mut Vec<String>) -> bool) {
        self.mutate(|table| {
            let Some(entry) = table.entries.get_mut(&id) else {
                return (Vec::new(), ());
            };
            if entry.job.is_terminal() || !edit(&mut entry.job.sub_tasks) {
                return (Vec::new(), ());
            }
            entry.last_emit = Some(Instant::now());
            (vec![JobEvent::Updated(entry.job.clone())], ())
        });
    }
}

/// Process-wide job manager.
///
/// Cheap to clone; all clones share one job table. [`add`](Self::add) and
/// [`run_single_task`](Self::run_single_task) spawn onto the current Tokio
/// runtime and must be called from within one.
#[derive(Clone)]
pub struct JobManager {
    shared: Arc<Shared>,
}

impl JobManager {
    pub fn new(config: ManagerConfig) -> Self {
        let subscribers = SubscriberRegistry::new(config.subscription_buffer);
        Self {
            shared: Arc::new(Shared {
                config,
                root: CancellationToken::new(),
                subscribers: Mutex::new(subscribers),
                table: Mutex::new(JobTable {
                    next_id: 0,
                    entries: HashMap::new(),
                    graveyard: VecDeque::new(),
                }),
            }),
        }
    }

    /// Submit `task` as a new job and return its id immediately.
    ///
    /// The job gets its own cancellation token derived from the manager's
    /// root token; it is not tied to the caller's lifetime.
    pub fn add<T: Task>(&self, description: impl Into<String>, task: T) -> JobId {
        self.spawn(description.into(), Box::new(task))
    }

    /// Submit a task under its own description.
    ///
    /// For callers that want queue visibility for work they will wait on
    /// themselves; pair with [`wait`](Self::wait).
    pub fn run_single_task<T: Task>(&self, task: T) -> JobId {
        let description = task.description();
        self.spawn(description, Box::new(task))
    }

    fn spawn(&self, description: String, task: Box<dyn Task>) -> JobId {
        let cancel = self.shared.root.child_token();
        let id = self.shared.mutate(|table| {
            table.next_id += 1;
            let id = table.next_id;
            let job = Job::new(id, description, Utc::now());
            let (done, _) = watch::channel(None);
            table.entries.insert(
                id,
                Entry {
                    job: job.clone(),
                    cancel: cancel.clone(),
                    done,
                    last_emit: None,
                },
            );
            (vec![JobEvent::Added(job)], id)
        });

        counter!("jobs_added_total").increment(1);
        tracing::debug!(job_id = id, "Job added");

        tokio::spawn(run_job(Arc::clone(&self.shared), id, task, cancel));
        id
    }

    /// Snapshot of one job, or `None` if unknown or evicted.
    pub fn get_job(&self, id: JobId) -> Option<Job> {
        let table = lock(&self.shared.table, "job table");
        table.entries.get(&id).map(|entry| entry.job.clone())
    }

    /// Snapshot of every tracked job, oldest submission first.
    pub fn get_queue(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = {
            let table = lock(&self.shared.table, "job table");
            table.entries.values().map(|entry| entry.job.clone()).collect()
        };
        jobs.sort_by(|a, b| a.add_time.cmp(&b.add_time).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Ask a job to stop.
    ///
    /// A `Ready` job goes straight to `Cancelled`. A `Running` job moves to
    /// `Stopping` and its token fires; the runner records `Cancelled` once the
    /// task returns. Unknown and terminal jobs are left alone.
    pub fn cancel_job(&self, id: JobId) {
        let retained = self.shared.config.retained_jobs;
        let token = self.shared.mutate(|table| {
            let Some(entry) = table.entries.get_mut(&id) else {
                return (Vec::new(), None);
            };
            let token = entry.cancel.clone();
            let status = entry.job.status;

            match status {
                JobStatus::Ready => {
                    entry.job.cancel(Utc::now());
                    let snapshot = entry.job.clone();
                    entry.done.send_replace(Some(snapshot.clone()));
                    let mut events = vec![JobEvent::Updated(snapshot)];
                    events.extend(table.retire(id, retained));
                    (events, Some(token))
                }
                JobStatus::Running => {
                    entry.job.stop();
                    (vec![JobEvent::Updated(entry.job.clone())], Some(token))
                }
                _ => (Vec::new(), None),
            }
        });

        // Fire only after the Stopping event is out, so it always precedes
        // whatever the runner publishes next.
        if let Some(token) = token {
            tracing::info!(job_id = id, "Job cancellation requested");
            token.cancel();
        }
    }

    /// [`cancel_job`](Self::cancel_job) every non-terminal job.
    pub fn cancel_all(&self) {
        let ids: Vec<JobId> = {
            let table = lock(&self.shared.table, "job table");
            table
                .entries
                .values()
                .filter(|entry| !entry.job.is_terminal())
                .map(|entry| entry.job.id)
                .collect()
        };
        for id in ids {
            self.cancel_job(id);
        }
    }

    /// Cancel everything and refuse to start further tasks.
    pub fn shutdown(&self) {
        self.cancel_all();
        self.shared.root.cancel();
    }

    /// Register for job lifecycle events until `cancel` fires.
    pub fn subscribe(&self, cancel: CancellationToken) -> ManagerSubscription {
        lock(&self.shared.subscribers, "job subscribers").subscribe(cancel)
    }

    /// Number of registered (not yet pruned) subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers, "job subscribers").len()
    }

    /// Wait until job `id` is terminal and return its final snapshot.
    ///
    /// Returns `None` if the id is unknown when called.
    pub async fn wait(&self, id: JobId) -> Option<Job> {
        let mut rx = {
            let table = lock(&self.shared.table, "job table");
            table.entries.get(&id)?.done.subscribe()
        };
        if rx.wait_for(Option::is_some).await.is_err() {
            tracing::debug!(job_id = id, "Job evicted while waiting");
        }
        let job = rx.borrow().clone();
        job
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

async fn run_job(shared: Arc<Shared>, id: JobId, task: Box<dyn Task>, cancel: CancellationToken) {
    if !shared.begin(id) {
        tracing::debug!(job_id = id, "Job cancelled before it started");
        return;
    }
    tracing::info!(job_id = id, "Job started");

    let ctx = JobContext::new(id, cancel, Progress::new(id, Arc::clone(&shared)));
    let outcome = match AssertUnwindSafe(task.execute(ctx)).catch_unwind().await {
        Ok(Ok(())) => Outcome::Succeeded,
        Ok(Err(err)) => Outcome::Errored(format!("{err:#}")),
        Err(panic) => Outcome::Panicked(panic_message(panic)),
    };

    let Some(job) = shared.complete(id, outcome) else {
        return;
    };

    counter!("jobs_completed_total", "status" => job.status.as_str()).increment(1);
    match job.status {
        JobStatus::Failed => tracing::warn!(
            job_id = id,
            error = job.error.as_deref().unwrap_or_default(),
            "Job failed"
        ),
        status => tracing::info!(job_id = id, status = %status, "Job ended"),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}
