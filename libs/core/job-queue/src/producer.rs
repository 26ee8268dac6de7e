//! Job producer
//!
//! Used by request handlers (or any other service) to schedule background
//! work. The producer validates the request, resolves options against the
//! queue defaults and writes the job to the store. An `Ok` means the job is
//! stored; an error means it was never scheduled.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_queue::{JobOptions, JobProducer, QueueDefaults};
//!
//! let producer = JobProducer::new(store, QueueDefaults::default());
//! let id = producer.enqueue("email-queue", &batch, JobOptions::new()).await?;
//! ```

use crate::config::QueueDefaults;
use crate::error::{QueueError, QueueResult};
use crate::job::{JobId, JobOptions, JobPayload, NewJob};
use crate::metrics;
use crate::registry::QueueDef;
use crate::store::JobStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Schedules jobs on a [`JobStore`].
#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn JobStore>,
    defaults: QueueDefaults,
}

impl JobProducer {
    pub fn new(store: Arc<dyn JobStore>, defaults: QueueDefaults) -> Self {
        Self { store, defaults }
    }

    pub fn defaults(&self) -> &QueueDefaults {
        &self.defaults
    }

    /// Enqueue a job.
    ///
    /// Fails with [`QueueError::Validation`] before touching the store when the
    /// queue name is empty, the payload rejects itself, or the resolved
    /// attempt limit is zero.
    pub async fn enqueue<P: JobPayload>(
        &self,
        queue: &str,
        payload: &P,
        options: JobOptions,
    ) -> QueueResult<JobId> {
        let job = self.prepare(queue, payload, &options)?;
        let id = self.store.enqueue(job).await?;

        metrics::record_enqueued(queue, 1);
        info!(
            queue = %queue,
            job_id = %id,
            delay_ms = options.delay.map(|d| d.as_millis() as u64),
            "Enqueued job"
        );
        Ok(id)
    }

    /// Enqueue on the queue named by `Q`.
    pub async fn enqueue_to<Q: QueueDef, P: JobPayload>(
        &self,
        payload: &P,
        options: JobOptions,
    ) -> QueueResult<JobId> {
        self.enqueue(Q::QUEUE_NAME, payload, options).await
    }

    /// Enqueue several payloads on one queue with the same options.
    ///
    /// Every payload is validated first, so a rejected payload schedules
    /// nothing. Store writes are sequential; if one fails, the ids already
    /// assigned stay scheduled and the error is returned.
    pub async fn enqueue_batch<P: JobPayload>(
        &self,
        queue: &str,
        payloads: &[P],
        options: JobOptions,
    ) -> QueueResult<Vec<JobId>> {
        if payloads.is_empty() {
            return Ok(vec![]);
        }

        let jobs = payloads
            .iter()
            .map(|payload| self.prepare(queue, payload, &options))
            .collect::<QueueResult<Vec<_>>>()?;

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.store.enqueue(job).await?);
        }

        metrics::record_enqueued(queue, ids.len() as u64);
        debug!(queue = %queue, count = ids.len(), "Enqueued batch of jobs");
        Ok(ids)
    }

    fn prepare<P: JobPayload>(&self, queue: &str, payload: &P, options: &JobOptions) -> QueueResult<NewJob> {
        if queue.trim().is_empty() {
            return Err(QueueError::Validation("queue name must not be empty".into()));
        }
        payload.validate().map_err(QueueError::Validation)?;

        let resolved = options.resolve(&self.defaults);
        if resolved.max_attempts == 0 {
            return Err(QueueError::Validation("max_attempts must be at least 1".into()));
        }

        Ok(NewJob {
            queue: queue.to_string(),
            payload: serde_json::to_value(payload)?,
            max_attempts: resolved.max_attempts,
            backoff: resolved.backoff,
            retention: resolved.retention,
            delay: resolved.delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::job::JobState;
    use crate::store::MemoryJobStore;
    use serde::Serialize;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Serialize)]
    struct Ping {
        target: String,
    }

    impl JobPayload for Ping {
        fn validate(&self) -> Result<(), String> {
            if self.target.is_empty() {
                return Err("target is required".into());
            }
            Ok(())
        }
    }

    fn producer() -> (Arc<MemoryJobStore>, JobProducer) {
        let store = Arc::new(MemoryJobStore::new());
        let producer = JobProducer::new(store.clone(), QueueDefaults::default());
        (store, producer)
    }

    #[tokio::test]
    async fn test_enqueue_applies_defaults() {
        let (store, producer) = producer();

        let id = producer
            .enqueue("email-queue", &json!({"n": 1}), JobOptions::new())
            .await
            .unwrap();
        let job = store.get("email-queue", id).await.unwrap().unwrap();

        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.backoff, BackoffPolicy::exponential(1000));
        assert_eq!(job.attempts_made, 0);
    }

    #[tokio::test]
    async fn test_enqueue_with_options() {
        let (store, producer) = producer();

        let options = JobOptions::new()
            .with_max_attempts(5)
            .with_backoff(BackoffPolicy::fixed(250))
            .with_delay(Duration::from_secs(10));
        let id = producer.enqueue("email-queue", &json!([]), options).await.unwrap();
        let job = store.get("email-queue", id).await.unwrap().unwrap();

        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.backoff, BackoffPolicy::fixed(250));
        assert!(job.ready_at > job.created_at);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (store, producer) = producer();

        let err = producer.enqueue(" ", &json!(1), JobOptions::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));

        let err = producer
            .enqueue("q", &Ping { target: String::new() }, JobOptions::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("target is required"));

        let err = producer
            .enqueue("q", &json!(1), JobOptions::new().with_max_attempts(0))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));

        assert_eq!(store.counts("q").await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_store_unavailable_schedules_nothing() {
        let (store, producer) = producer();
        store.set_available(false);

        let err = producer.enqueue("q", &json!(1), JobOptions::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::StoreUnavailable(_)));

        store.set_available(true);
        assert_eq!(store.counts("q").await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_enqueue_batch() {
        let (store, producer) = producer();
        let pings = vec![
            Ping { target: "a".into() },
            Ping { target: "b".into() },
        ];

        let ids = producer.enqueue_batch("q", &pings, JobOptions::new()).await.unwrap();
        assert_eq!(ids, vec![JobId(1), JobId(2)]);

        let bad = vec![Ping { target: "c".into() }, Ping { target: String::new() }];
        assert!(producer.enqueue_batch("q", &bad, JobOptions::new()).await.is_err());
        assert_eq!(store.counts("q").await.unwrap().waiting, 2);
    }
}
