//! Engine configuration
//!
//! `QueueDefaults` carries the per-job defaults applied by the producer, and
//! `WorkerConfig` tunes the consumer loop. Both are plain values passed in at
//! construction; nothing here reads process state.

use crate::backoff::BackoffPolicy;
use crate::error::{QueueError, QueueResult};
use crate::registry::QueueDef;
use crate::retention::RetentionPolicy;
use std::time::Duration;
use uuid::Uuid;

/// Default number of attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Defaults applied to every job unless its options override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDefaults {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
}

impl QueueDefaults {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Configuration for the job worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues this worker consumes, polled in order
    pub queues: Vec<String>,

    /// Unique worker ID (auto-generated if not provided)
    pub worker_id: String,

    /// Maximum jobs executing at once across all queues
    pub concurrency: usize,

    /// Poll interval in milliseconds when no job is ready
    pub poll_interval_ms: u64,

    /// Handler execution limit in milliseconds (None = unlimited)
    pub handler_timeout_ms: Option<u64>,

    /// Active jobs older than this are considered abandoned and requeued
    pub lease_timeout_ms: u64,

    /// Interval between retention sweeps in seconds
    pub sweep_interval_secs: u64,
}

impl WorkerConfig {
    /// Create a config consuming a single queue
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queues: vec![queue.into()],
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: 1,
            poll_interval_ms: 1000,
            handler_timeout_ms: Some(30_000),
            lease_timeout_ms: 120_000,
            sweep_interval_secs: 60,
        }
    }

    /// Create a config from a `QueueDef`
    pub fn from_queue_def<Q: QueueDef>() -> Self {
        Self::new(Q::QUEUE_NAME)
            .with_concurrency(Q::CONCURRENCY)
            .with_poll_interval_ms(Q::POLL_INTERVAL_MS)
    }

    /// Consume an additional queue
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queues.push(queue.into());
        self
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the concurrency limit
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Set the handler timeout (None disables it)
    pub fn with_handler_timeout_ms(mut self, timeout: Option<u64>) -> Self {
        self.handler_timeout_ms = timeout;
        self
    }

    /// Set the lease timeout for abandoned jobs
    pub fn with_lease_timeout_ms(mut self, timeout: u64) -> Self {
        self.lease_timeout_ms = timeout;
        self
    }

    /// Set the retention sweep interval
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Check the settings are consistent.
    ///
    /// The lease must outlive the handler timeout, otherwise a job still running
    /// could be handed to a second worker.
    pub fn validate(&self) -> QueueResult<()> {
        if self.queues.is_empty() {
            return Err(QueueError::Config("worker has no queues".into()));
        }
        if self.queues.iter().any(|q| q.trim().is_empty()) {
            return Err(QueueError::Config("queue names must not be empty".into()));
        }
        match self.handler_timeout_ms {
            Some(timeout) if timeout >= self.lease_timeout_ms => Err(QueueError::Config(format!(
                "lease timeout ({}ms) must exceed handler timeout ({}ms)",
                self.lease_timeout_ms, timeout
            ))),
            None if self.lease_timeout_ms != u64::MAX => Err(QueueError::Config(
                "a handler timeout is required unless stalled-job recovery is disabled".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestQueue;

    impl QueueDef for TestQueue {
        const QUEUE_NAME: &'static str = "test-queue";
        const CONCURRENCY: usize = 4;
    }

    #[test]
    fn test_queue_defaults() {
        let defaults = QueueDefaults::default();
        assert_eq!(defaults.max_attempts, 3);
        assert_eq!(defaults.backoff, BackoffPolicy::exponential(1000));
        assert_eq!(defaults.retention, RetentionPolicy::new(100, 86_400));
    }

    #[test]
    fn test_from_queue_def() {
        let config = WorkerConfig::from_queue_def::<TestQueue>();

        assert_eq!(config.queues, vec!["test-queue".to_string()]);
        assert_eq!(config.concurrency, 4);
        assert!(config.worker_id.starts_with("worker-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = WorkerConfig::new("email-queue")
            .with_queue("digest-queue")
            .with_worker_id("worker-1")
            .with_concurrency(0)
            .with_poll_interval_ms(50)
            .with_handler_timeout_ms(Some(5_000));

        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.worker_id, "worker-1");
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.handler_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_lease_must_exceed_timeout() {
        let config = WorkerConfig::new("q")
            .with_handler_timeout_ms(Some(10_000))
            .with_lease_timeout_ms(5_000);
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_no_timeout_requires_disabled_recovery() {
        let config = WorkerConfig::new("q").with_handler_timeout_ms(None);
        assert!(config.validate().is_err());

        let config = config.with_lease_timeout_ms(u64::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_queue_rejected() {
        let config = WorkerConfig::new("  ");
        assert!(config.validate().is_err());
    }
}
