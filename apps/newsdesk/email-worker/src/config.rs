//! Worker settings read from the environment.

use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use domain_notifications::EmailQueue;
use job_queue::{BackoffPolicy, QueueDef, QueueDefaults, RetentionPolicy, WorkerConfig};

/// Everything the email worker needs beyond Redis and SMTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub queue: String,
    pub key_prefix: String,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// `0` disables the handler timeout (and with it stalled-job recovery).
    pub job_timeout_ms: u64,
    pub lease_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
    pub health_port: u16,
}

impl WorkerSettings {
    /// Per-job defaults for producers and the store.
    pub fn queue_defaults(&self) -> QueueDefaults {
        QueueDefaults::default()
            .with_max_attempts(self.max_attempts)
            .with_backoff(self.backoff)
            .with_retention(self.retention)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let config = WorkerConfig::new(self.queue.clone())
            .with_concurrency(self.concurrency)
            .with_poll_interval_ms(self.poll_interval_ms);

        if self.job_timeout_ms == 0 {
            config
                .with_handler_timeout_ms(None)
                .with_lease_timeout_ms(u64::MAX)
        } else {
            config
                .with_handler_timeout_ms(Some(self.job_timeout_ms))
                .with_lease_timeout_ms(self.lease_timeout_ms)
        }
    }
}

fn parse_backoff() -> Result<BackoffPolicy, ConfigError> {
    let delay_ms = env_parse("JOB_BACKOFF_MS", job_queue::backoff::DEFAULT_BASE_DELAY_MS)?;
    match env_or_default("JOB_BACKOFF_TYPE", "exponential").to_ascii_lowercase().as_str() {
        "exponential" => Ok(BackoffPolicy::exponential(delay_ms)),
        "fixed" => Ok(BackoffPolicy::fixed(delay_ms)),
        other => Err(ConfigError::ParseError {
            key: "JOB_BACKOFF_TYPE".to_string(),
            details: format!("expected 'fixed' or 'exponential', got '{}'", other),
        }),
    }
}

impl FromEnv for WorkerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let max_attempts = env_parse("JOB_MAX_ATTEMPTS", job_queue::DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::ParseError {
                key: "JOB_MAX_ATTEMPTS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            queue: env_or_default("EMAIL_QUEUE", EmailQueue::QUEUE_NAME),
            key_prefix: env_or_default("QUEUE_PREFIX", job_queue::DEFAULT_KEY_PREFIX),
            concurrency: env_parse("WORKER_CONCURRENCY", EmailQueue::CONCURRENCY)?,
            poll_interval_ms: env_parse("WORKER_POLL_INTERVAL_MS", EmailQueue::POLL_INTERVAL_MS)?,
            job_timeout_ms: env_parse("JOB_TIMEOUT_MS", 30_000)?,
            lease_timeout_ms: env_parse("JOB_LEASE_MS", 120_000)?,
            max_attempts,
            backoff: parse_backoff()?,
            retention: RetentionPolicy::new(
                env_parse("JOB_RETAIN_COUNT", job_queue::retention::DEFAULT_MAX_COUNT)?,
                env_parse("JOB_RETAIN_AGE_SECS", job_queue::retention::DEFAULT_MAX_AGE_SECS)?,
            ),
            health_port: env_parse("HEALTH_PORT", 8082)?,
        })
    }
}
