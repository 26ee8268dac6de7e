//! Job store abstraction.
//!
//! The store exclusively owns job records. Every state transition is a single
//! atomic operation against it, so a job id is never handed to two workers and
//! concurrent complete/fail calls cannot lose updates.
//!
//! - [`MemoryJobStore`]: single-process store used in tests and local tooling
//! - [`RedisJobStore`]: durable store backed by Redis, transitions run as Lua scripts

mod memory;
mod redis_store;

pub use memory::MemoryJobStore;
pub use redis_store::{RedisJobStore, DEFAULT_KEY_PREFIX};

use crate::error::QueueResult;
use crate::job::{FailureOutcome, Job, JobCounts, JobId, NewJob};
use async_trait::async_trait;
use std::time::Duration;

/// Durable holding area for job records, keyed by queue name.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Returns once the write is durable.
    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId>;

    /// Atomically lease the oldest ready job of `queue`.
    ///
    /// Jobs are ordered by ready time, then by id. Delayed jobs whose ready time
    /// has not elapsed are invisible.
    async fn claim_next(&self, queue: &str) -> QueueResult<Option<Job>>;

    /// `active -> completed`, then apply the job's retention policy.
    async fn mark_completed(
        &self,
        queue: &str,
        id: JobId,
        result: Option<serde_json::Value>,
    ) -> QueueResult<()>;

    /// Record a failed attempt: `active -> delayed` while attempts remain,
    /// `active -> failed` once they are used up.
    async fn mark_failed(&self, queue: &str, id: JobId, error: &str) -> QueueResult<FailureOutcome>;

    /// Evict finished jobs outside their retention bounds, in every queue.
    ///
    /// Returns the number of evicted records.
    async fn sweep_retention(&self) -> QueueResult<u64>;

    /// Fetch a job record.
    async fn get(&self, queue: &str, id: JobId) -> QueueResult<Option<Job>>;

    /// Count jobs per state.
    async fn counts(&self, queue: &str) -> QueueResult<JobCounts>;

    /// Return active jobs whose lease started more than `lease_timeout` ago to
    /// the ready set. The abandoned attempt is not counted.
    async fn requeue_stalled(&self, queue: &str, lease_timeout: Duration) -> QueueResult<u64>;

    /// Check that the store is reachable.
    async fn ping(&self) -> QueueResult<()>;

    /// Store name for logging.
    fn name(&self) -> &'static str;
}
