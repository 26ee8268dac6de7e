//! Queue error types
//!
//! Two families of errors live here:
//! - **`QueueError`**: failures of the engine itself (store, validation, state machine).
//!   These are surfaced to the caller and never retried by the engine.
//! - **`JobError`**: the outcome of a failed handler attempt. Every variant counts
//!   against the job's `max_attempts`; the engine cannot tell transient causes from
//!   permanent ones, so it does not try to.

use crate::job::{JobId, JobState};
use std::time::Duration;
use thiserror::Error;

/// Result alias for engine operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Engine errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// The durable store cannot be reached or rejected the command.
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    /// The queue name, payload or options were rejected before reaching the store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No job with this id exists in the queue.
    #[error("Job {id} not found in queue '{queue}'")]
    NotFound { queue: String, id: JobId },

    /// A transition was attempted on a job that is not in the expected state.
    #[error("Job {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A worker was asked to consume a queue nobody registered a handler for.
    #[error("No handler registered for queue '{0}'")]
    NoHandler(String),

    /// Worker or engine configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Failure of a single handler attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The handler returned an error.
    #[error("{0}")]
    Failed(String),

    /// The payload could not be decoded into the handler's input type.
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// The handler exceeded the configured execution time.
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    /// The handler task panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Create a handler failure from any displayable error.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Failed(_) => "failed",
            JobError::Payload(_) => "payload",
            JobError::Timeout(_) => "timeout",
            JobError::Panicked(_) => "panicked",
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Payload(err.to_string())
    }
}
