//! Job lifecycle events
//!
//! The worker publishes one event per finished attempt on a broadcast
//! channel. Subscribers that fall behind lose the oldest events; the worker
//! never waits on them.

use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default buffer of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// An attempt outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum JobEvent {
    #[serde(rename = "job.completed")]
    Completed {
        queue: String,
        job_id: JobId,
        attempts_made: u32,
        duration_ms: u64,
        finished_at: DateTime<Utc>,
    },
    /// Emitted for every failed attempt. `will_retry` is false on the last one.
    #[serde(rename = "job.failed")]
    Failed {
        queue: String,
        job_id: JobId,
        attempts_made: u32,
        max_attempts: u32,
        error: String,
        will_retry: bool,
        duration_ms: u64,
        finished_at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Event name, `job.completed` or `job.failed`.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Completed { .. } => "job.completed",
            JobEvent::Failed { .. } => "job.failed",
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Completed { job_id, .. } | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            JobEvent::Completed { queue, .. } | JobEvent::Failed { queue, .. } => queue,
        }
    }
}

/// Broadcast channel for [`JobEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(id: u64) -> JobEvent {
        JobEvent::Completed {
            queue: "email-queue".into(),
            job_id: JobId(id),
            attempts_made: 1,
            duration_ms: 12,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(completed(1).name(), "job.completed");

        let failed = JobEvent::Failed {
            queue: "email-queue".into(),
            job_id: JobId(2),
            attempts_made: 1,
            max_attempts: 3,
            error: "smtp down".into(),
            will_retry: true,
            duration_ms: 5,
            finished_at: Utc::now(),
        };
        assert_eq!(failed.name(), "job.failed");
        assert_eq!(failed.job_id(), JobId(2));

        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["event"], "job.failed");
        assert_eq!(json["will_retry"], true);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(completed(1));

        let mut rx = bus.subscribe();
        bus.publish(completed(2));
        assert_eq!(rx.recv().await.unwrap().job_id(), JobId(2));
    }
}
