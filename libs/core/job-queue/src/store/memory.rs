//! In-memory job store.
//!
//! All queues live behind one mutex; every operation takes the lock once, which
//! makes each transition atomic. The store can be switched offline to exercise
//! `StoreUnavailable` paths.

use super::JobStore;
use crate::backoff::{self, RetryDecision};
use crate::clock::{Clock, SystemClock};
use crate::error::{QueueError, QueueResult};
use crate::job::{add_delay, FailureOutcome, Job, JobCounts, JobId, JobState, NewJob};
use crate::retention::{select_evictions, FinishedRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    last_id: u64,
    jobs: BTreeMap<JobId, Job>,
    /// Claimable jobs ordered by (ready time, id).
    ready: BTreeSet<(DateTime<Utc>, JobId)>,
}

impl QueueState {
    fn job_mut(&mut self, queue: &str, id: JobId) -> QueueResult<&mut Job> {
        self.jobs.get_mut(&id).ok_or_else(|| QueueError::NotFound {
            queue: queue.to_string(),
            id,
        })
    }

    /// Evict finished jobs in `state` that fall outside their retention bounds.
    fn apply_retention(&mut self, state: JobState, now: DateTime<Utc>) -> u64 {
        let records: Vec<FinishedRecord> = self
            .jobs
            .values()
            .filter(|job| job.state == state)
            .map(|job| FinishedRecord {
                id: job.id,
                finished_at: job.finished_at.unwrap_or(job.created_at),
                policy: job.retention,
            })
            .collect();

        let evicted = select_evictions(&records, now);
        for id in &evicted {
            self.jobs.remove(id);
        }
        evicted.len() as u64
    }
}

fn ensure_active(job: &Job) -> QueueResult<()> {
    if job.state != JobState::Active {
        return Err(QueueError::InvalidTransition {
            id: job.id,
            expected: JobState::Active,
            actual: job.state,
        });
    }
    Ok(())
}

/// Job store held in process memory.
pub struct MemoryJobStore {
    queues: Mutex<HashMap<String, QueueState>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl MemoryJobStore {
    /// Create a store using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store with a custom time source.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going offline (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// All jobs of a queue, ordered by id.
    pub fn jobs(&self, queue: &str) -> Vec<Job> {
        self.queues
            .lock()
            .map(|queues| {
                queues
                    .get(queue)
                    .map(|q| q.jobs.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, HashMap<String, QueueState>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(QueueError::StoreUnavailable("memory store is offline".into()));
        }
        self.queues
            .lock()
            .map_err(|_| QueueError::StoreUnavailable("memory store lock poisoned".into()))
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, new_job: NewJob) -> QueueResult<JobId> {
        let now = self.clock.now();
        let mut queues = self.lock()?;
        let queue = queues.entry(new_job.queue.clone()).or_default();

        queue.last_id += 1;
        let id = JobId(queue.last_id);
        let job = new_job.into_job(id, now);

        queue.ready.insert((job.ready_at, id));
        debug!(queue = %job.queue, job_id = %id, state = %job.state, "Stored job");
        queue.jobs.insert(id, job);

        Ok(id)
    }

    async fn claim_next(&self, queue_name: &str) -> QueueResult<Option<Job>> {
        let now = self.clock.now();
        let mut queues = self.lock()?;
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(None);
        };

        let next = match queue.ready.first() {
            Some(&(ready_at, id)) if ready_at <= now => (ready_at, id),
            _ => return Ok(None),
        };
        queue.ready.remove(&next);

        let job = queue.job_mut(queue_name, next.1)?;
        job.state = JobState::Active;
        job.processed_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn mark_completed(
        &self,
        queue_name: &str,
        id: JobId,
        result: Option<serde_json::Value>,
    ) -> QueueResult<()> {
        let now = self.clock.now();
        let mut queues = self.lock()?;
        let queue = queues.get_mut(queue_name).ok_or_else(|| QueueError::NotFound {
            queue: queue_name.to_string(),
            id,
        })?;

        let job = queue.job_mut(queue_name, id)?;
        ensure_active(job)?;
        job.attempts_made += 1;
        job.state = JobState::Completed;
        job.finished_at = Some(now);
        job.result = result;

        let evicted = queue.apply_retention(JobState::Completed, now);
        if evicted > 0 {
            debug!(queue = %queue_name, evicted, "Evicted completed jobs");
        }
        Ok(())
    }

    async fn mark_failed(&self, queue_name: &str, id: JobId, error: &str) -> QueueResult<FailureOutcome> {
        let now = self.clock.now();
        let mut queues = self.lock()?;
        let queue = queues.get_mut(queue_name).ok_or_else(|| QueueError::NotFound {
            queue: queue_name.to_string(),
            id,
        })?;

        let job = queue.job_mut(queue_name, id)?;
        ensure_active(job)?;
        job.attempts_made += 1;
        job.last_error = Some(error.to_string());

        match backoff::decide(job.attempts_made, job.max_attempts, &job.backoff) {
            RetryDecision::Retry { delay_ms } => {
                let ready_at = add_delay(now, Duration::from_millis(delay_ms));
                job.state = JobState::Delayed;
                job.ready_at = ready_at;
                let outcome = FailureOutcome::Retrying {
                    attempts_made: job.attempts_made,
                    delay_ms,
                    ready_at,
                };
                queue.ready.insert((ready_at, id));
                Ok(outcome)
            }
            RetryDecision::Exhausted => {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                let outcome = FailureOutcome::Failed {
                    attempts_made: job.attempts_made,
                };
                queue.apply_retention(JobState::Failed, now);
                Ok(outcome)
            }
        }
    }

    async fn sweep_retention(&self) -> QueueResult<u64> {
        let now = self.clock.now();
        let mut queues = self.lock()?;
        let mut evicted = 0;
        for queue in queues.values_mut() {
            evicted += queue.apply_retention(JobState::Completed, now);
            evicted += queue.apply_retention(JobState::Failed, now);
        }
        Ok(evicted)
    }

    async fn get(&self, queue: &str, id: JobId) -> QueueResult<Option<Job>> {
        let queues = self.lock()?;
        Ok(queues.get(queue).and_then(|q| q.jobs.get(&id).cloned()))
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        let queues = self.lock()?;
        let mut counts = JobCounts::default();
        if let Some(q) = queues.get(queue) {
            for job in q.jobs.values() {
                counts.add(job.state);
            }
        }
        Ok(counts)
    }

    async fn requeue_stalled(&self, queue_name: &str, lease_timeout: Duration) -> QueueResult<u64> {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(lease_timeout)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut queues = self.lock()?;
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(0);
        };

        let mut requeued = Vec::new();
        for job in queue.jobs.values_mut() {
            let leased_at = job.processed_at.unwrap_or(job.created_at);
            if job.state == JobState::Active && leased_at <= cutoff {
                job.state = JobState::Waiting;
                job.ready_at = now;
                requeued.push(job.id);
            }
        }
        for id in &requeued {
            queue.ready.insert((now, *id));
        }
        Ok(requeued.len() as u64)
    }

    async fn ping(&self) -> QueueResult<()> {
        self.lock().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
