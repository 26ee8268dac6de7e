//! Job records and their lifecycle.
//!
//! ```text
//!  enqueue ──> waiting ─┐                  ┌─> completed
//!              delayed ─┴─> active (lease) ┼─> delayed (retry, bounded by max_attempts)
//!                                          └─> failed  (terminal)
//! ```

use crate::backoff::BackoffPolicy;
use crate::config::QueueDefaults;
use crate::retention::RetentionPolicy;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Job identifier, assigned monotonically per queue starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(JobId)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        JobId(id)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed.
    Waiting,
    /// Leased by a worker.
    Active,
    /// Handler succeeded.
    Completed,
    /// All attempts failed.
    Failed,
    /// Waiting for its ready time (start delay or retry backoff).
    Delayed,
}

impl JobState {
    /// Whether the job has reached an end state.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
    pub created_at: DateTime<Utc>,
    /// When the job becomes visible to `claim_next`.
    pub ready_at: DateTime<Utc>,
    /// Start of the current (or last) attempt.
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Value returned by the handler on success.
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Decode the payload into the handler's input type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Attempts still available after the current one.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_made)
    }
}

/// A job as handed to the store by the producer, options already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub queue: String,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
    /// One-time start delay. Independent of retry backoff.
    pub delay: Option<Duration>,
}

impl NewJob {
    /// Build a job record for `id` created at `now`.
    pub fn into_job(self, id: JobId, now: DateTime<Utc>) -> Job {
        let (state, ready_at) = match self.delay.filter(|d| !d.is_zero()) {
            Some(delay) => (JobState::Delayed, add_delay(now, delay)),
            None => (JobState::Waiting, now),
        };

        Job {
            id,
            queue: self.queue,
            payload: self.payload,
            state,
            attempts_made: 0,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            retention: self.retention,
            created_at: now,
            ready_at,
            processed_at: None,
            finished_at: None,
            last_error: None,
            result: None,
        }
    }
}

/// `now + delay`, clamped to the latest representable instant.
pub(crate) fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Per-job overrides of the queue defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOptions {
    pub max_attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
    pub retention: Option<RetentionPolicy>,
    pub delay: Option<Duration>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Delay the first attempt. Retries still follow the backoff policy.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fill unset options from the queue defaults.
    pub fn resolve(&self, defaults: &QueueDefaults) -> ResolvedOptions {
        ResolvedOptions {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            retention: self.retention.unwrap_or(defaults.retention),
            delay: self.delay,
        }
    }
}

/// Options after merging with the queue defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
    pub delay: Option<Duration>,
}

/// Result of reporting a failed attempt to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job is delayed and will be retried at `ready_at`.
    Retrying {
        attempts_made: u32,
        delay_ms: u64,
        ready_at: DateTime<Utc>,
    },
    /// The job exhausted its attempts.
    Failed { attempts_made: u32 },
}

impl FailureOutcome {
    pub fn attempts_made(&self) -> u32 {
        match self {
            FailureOutcome::Retrying { attempts_made, .. } | FailureOutcome::Failed { attempts_made } => {
                *attempts_made
            }
        }
    }

    pub fn will_retry(&self) -> bool {
        matches!(self, FailureOutcome::Retrying { .. })
    }
}

/// Number of jobs per state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn add(&mut self, state: JobState) {
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Active => self.active += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}

/// Payloads accepted by the producer.
///
/// Override `validate` to reject malformed payloads before they reach the store.
pub trait JobPayload: Serialize + Send + Sync {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl JobPayload for serde_json::Value {}
