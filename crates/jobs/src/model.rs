// crates/jobs/src/model.rs
//! Wire representation of a job, as served over REST and SSE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Job, JobStatus};

/// JSON projection of a [`Job`].
///
/// `progress` is present only while the job reports a determinate value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobModel {
    pub id: String,
    pub status: JobStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub add_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobModel {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            status: job.status,
            description: job.description.clone(),
            sub_tasks: job.sub_tasks.clone(),
            progress: job.progress(),
            start_time: job.start_time,
            end_time: job.end_time,
            add_time: job.add_time,
            error: job.error.clone(),
        }
    }
}

impl From<Job> for JobModel {
    fn from(job: Job) -> Self {
        Self::from(&job)
    }
}
