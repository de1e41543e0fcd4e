// crates/server/src/events/mod.rs
//! Server-sent events: the event vocabulary and the broker that fans them
//! out to connected clients.

pub mod broker;

use std::fmt;
use std::str::FromStr;

use axum::response::sse::Event;
use reel_jobs::{JobEvent, JobModel};
use reel_observability::LogEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use broker::{ClientSubscription, EventBroker, DEFAULT_CLIENT_BUFFER};

/// The SSE `event:` name. Closed set; decoding anything else fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "job.add")]
    JobAdd,
    #[serde(rename = "job.remove")]
    JobRemove,
    #[serde(rename = "job.update")]
    JobUpdate,
    #[serde(rename = "log.entries")]
    LogEntries,
    #[serde(rename = "scan.complete")]
    ScanComplete,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Connected,
        EventType::JobAdd,
        EventType::JobRemove,
        EventType::JobUpdate,
        EventType::LogEntries,
        EventType::ScanComplete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::JobAdd => "job.add",
            EventType::JobRemove => "job.remove",
            EventType::JobUpdate => "job.update",
            EventType::LogEntries => "log.entries",
            EventType::ScanComplete => "scan.complete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0:?}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatusUpdateType {
    Add,
    Remove,
    Update,
}

/// Payload of the `job.*` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    #[serde(rename = "type")]
    pub kind: JobStatusUpdateType,
    pub job: JobModel,
}

/// One event as pushed to SSE clients.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Connected,
    Job(JobStatusUpdate),
    LogEntries(Vec<LogEntry>),
    ScanComplete,
}

impl SseEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            SseEvent::Connected => EventType::Connected,
            SseEvent::Job(update) => match update.kind {
                JobStatusUpdateType::Add => EventType::JobAdd,
                JobStatusUpdateType::Remove => EventType::JobRemove,
                JobStatusUpdateType::Update => EventType::JobUpdate,
            },
            SseEvent::LogEntries(_) => EventType::LogEntries,
            SseEvent::ScanComplete => EventType::ScanComplete,
        }
    }

    /// JSON for the `data:` line.
    pub fn to_data(&self) -> serde_json::Result<String> {
        match self {
            SseEvent::Connected => Ok("{}".to_string()),
            SseEvent::Job(update) => serde_json::to_string(update),
            SseEvent::LogEntries(entries) => serde_json::to_string(entries),
            SseEvent::ScanComplete => Ok("null".to_string()),
        }
    }

    pub fn to_sse(&self) -> serde_json::Result<Event> {
        Ok(Event::default()
            .event(self.event_type().as_str())
            .data(self.to_data()?))
    }
}

impl From<JobEvent> for SseEvent {
    fn from(event: JobEvent) -> Self {
        let (kind, job) = match event {
            JobEvent::Added(job) => (JobStatusUpdateType::Add, job),
            JobEvent::Updated(job) => (JobStatusUpdateType::Update, job),
            JobEvent::Removed(job) => (JobStatusUpdateType::Remove, job),
        };
        SseEvent::Job(JobStatusUpdate {
            kind,
            job: JobModel::from(job),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reel_jobs::{task_fn, JobManager, JobStatus};

    #[test]
    fn test_event_type_round_trip() {
        for kind in EventType::ALL {
            assert_eq!(kind.as_str().parse::<EventType>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let err = "job.paused".parse::<EventType>().unwrap_err();
        assert_eq!(err, UnknownEventType("job.paused".to_string()));
        assert!(serde_json::from_str::<EventType>("\"JOB.ADD\"").is_err());
    }

    #[test]
    fn test_fixed_payloads() {
        assert_eq!(SseEvent::Connected.to_data().unwrap(), "{}");
        assert_eq!(SseEvent::ScanComplete.to_data().unwrap(), "null");
    }

    #[tokio::test]
    async fn test_job_event_becomes_typed_update() {
        let manager = JobManager::default();
        let id = manager.add("Scanning...", task_fn("scan", |_ctx| async { Ok(()) }));
        let job = manager.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Finished);

        let event = SseEvent::from(JobEvent::Updated(job));
        assert_eq!(event.event_type(), EventType::JobUpdate);

        let data: serde_json::Value = serde_json::from_str(&event.to_data().unwrap()).unwrap();
        assert_eq!(data["type"], "UPDATE");
        assert_eq!(data["job"]["id"], id.to_string());
        assert_eq!(data["job"]["status"], "FINISHED");
        assert!(data["job"]["endTime"].is_string());
    }

    #[test]
    fn test_log_entries_payload_is_array() {
        let event = SseEvent::LogEntries(vec![LogEntry::new("info", "hello")]);
        assert_eq!(event.event_type(), EventType::LogEntries);
        let data: serde_json::Value = serde_json::from_str(&event.to_data().unwrap()).unwrap();
        assert_eq!(data[0]["message"], "hello");
    }
}
