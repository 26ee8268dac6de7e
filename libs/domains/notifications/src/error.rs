//! Error types for the notifications domain.

use job_queue::{JobError, QueueError};
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// A request or batch failed validation before queueing.
    #[error("Invalid notification: {0}")]
    InvalidRequest(String),

    /// Email provider error.
    #[error("Email provider error: {0}")]
    ProviderError(String),

    /// Some messages of a batch were not sent. The whole batch is retried.
    #[error("{failed} of {total} emails failed to send: {first_error}")]
    PartialBatch {
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// The job queue rejected the batch.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::ConfigError(err.to_string())
    }
}

impl From<lettre::address::AddressError> for NotificationError {
    fn from(err: lettre::address::AddressError) -> Self {
        NotificationError::ProviderError(format!("Invalid address: {}", err))
    }
}

impl From<lettre::error::Error> for NotificationError {
    fn from(err: lettre::error::Error) -> Self {
        NotificationError::ProviderError(format!("Failed to build email message: {}", err))
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotificationError::ProviderError(format!("SMTP error: {}", err))
    }
}

/// Any notification failure inside a job counts as a failed attempt.
impl From<NotificationError> for JobError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::InvalidRequest(msg) => JobError::Payload(msg),
            other => JobError::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_batch_message() {
        let err = NotificationError::PartialBatch {
            failed: 1,
            total: 3,
            first_error: "mailbox unavailable".into(),
        };
        assert_eq!(err.to_string(), "1 of 3 emails failed to send: mailbox unavailable");
        assert!(matches!(JobError::from(err), JobError::Failed(_)));
    }

    #[test]
    fn test_invalid_request_is_payload_error() {
        let err = NotificationError::InvalidRequest("empty batch".into());
        assert!(matches!(JobError::from(err), JobError::Payload(_)));
    }
}
