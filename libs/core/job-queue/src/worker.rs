//! The job worker loop.
//!
//! `JobWorker` claims ready jobs from its queues while concurrency permits are
//! available and runs each one in its own task. Every attempt ends in exactly
//! one store transition: `mark_completed` on success, `mark_failed` on error,
//! panic or timeout.

use crate::config::WorkerConfig;
use crate::error::{JobError, QueueError, QueueResult};
use crate::events::{EventBus, JobEvent};
use crate::job::Job;
use crate::metrics::{self, QueueMetrics};
use crate::registry::{HandlerRegistry, HandlerResult, JobHandler};
use crate::store::JobStore;
use chrono::Utc;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

/// Upper bound of the pause after repeated store errors.
const MAX_BACKOFF_SECS: u64 = 30;

/// Placeholder period for the stall check when recovery is disabled.
const DISABLED_TICK: Duration = Duration::from_secs(3600);

/// Generic worker executing jobs from one or more queues.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register_processor::<EmailQueue, _>(dispatcher);
///
/// let worker = JobWorker::new(store, registry, WorkerConfig::from_queue_def::<EmailQueue>());
/// worker.run(shutdown_rx).await?;
/// ```
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    events: EventBus,
    /// Limits jobs executing at once across all queues
    semaphore: Arc<Semaphore>,
}

impl JobWorker {
    pub fn new(store: Arc<dyn JobStore>, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            store,
            registry: Arc::new(registry),
            config,
            events: EventBus::default(),
            semaphore,
        }
    }

    /// Publish events on a shared bus instead of a private one.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to `job.completed` / `job.failed` events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Run the worker loop until `shutdown` flips to `true` or its sender is
    /// dropped. In-flight jobs are awaited before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        self.check_ready()?;

        info!(
            worker_id = %self.config.worker_id,
            queues = ?self.config.queues,
            store = self.store.name(),
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting job worker"
        );

        let poll_interval = self.config.poll_interval();
        let stall_enabled = self.config.lease_timeout_ms != u64::MAX;

        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stall_period = if stall_enabled {
            self.config.lease_timeout().max(Duration::from_millis(1))
        } else {
            DISABLED_TICK
        };
        let mut stall = tokio::time::interval(stall_period);
        stall.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            match self.fill(&mut in_flight).await {
                Ok(_) => {
                    if consecutive_errors > 0 {
                        info!("Job store recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff_secs =
                        std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                    warn!(
                        error = %e,
                        consecutive_errors = %consecutive_errors,
                        backoff_secs = %backoff_secs,
                        "Failed to claim jobs, backing off"
                    );
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                    continue;
                }
            }

            let idle = self.semaphore.available_permits() > 0;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Received shutdown signal, stopping worker");
                        break;
                    }
                }
                _ = sweep.tick() => self.sweep_retention().await,
                _ = stall.tick(), if stall_enabled => self.recover_stalled().await,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Job task failed to join");
                    }
                }
                _ = tokio::time::sleep(poll_interval), if idle => {}
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight jobs");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job task failed to join");
            }
        }

        info!("Job worker stopped");
        Ok(())
    }

    /// Execute ready jobs until none is left, then return how many attempts ran.
    ///
    /// Jobs delayed into the future are left alone. Useful for tests and
    /// one-shot tooling.
    pub async fn run_until_idle(&self) -> QueueResult<usize> {
        self.check_ready()?;

        let mut executed = 0;
        loop {
            let mut in_flight = JoinSet::new();
            let claimed = self.fill(&mut in_flight).await?;
            if claimed == 0 {
                return Ok(executed);
            }
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Job task failed to join");
                }
            }
            executed += claimed;
        }
    }

    fn check_ready(&self) -> QueueResult<()> {
        self.config.validate()?;
        match self.config.queues.iter().find(|q| !self.registry.contains(q)) {
            Some(queue) => Err(QueueError::NoHandler(queue.clone())),
            None => Ok(()),
        }
    }

    /// Claim jobs round-robin across queues until permits or ready jobs run out.
    async fn fill(&self, in_flight: &mut JoinSet<()>) -> QueueResult<usize> {
        let mut claimed = 0;
        loop {
            let mut progressed = false;
            for queue in &self.config.queues {
                let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                    return Ok(claimed);
                };
                if let Some(job) = self.store.claim_next(queue).await? {
                    self.spawn(in_flight, job, permit);
                    claimed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(claimed);
            }
        }
    }

    fn spawn(&self, in_flight: &mut JoinSet<()>, job: Job, permit: OwnedSemaphorePermit) {
        let span = tracing::info_span!(
            "job",
            queue = %job.queue,
            job_id = %job.id,
            attempt = job.attempts_made + 1
        );
        let execution = Execution {
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            handler: self.registry.get(&job.queue),
            timeout: self.config.handler_timeout(),
            metrics: QueueMetrics::new(&job.queue),
        };
        in_flight.spawn(
            async move {
                let _permit = permit;
                execution.run(job).await;
            }
            .instrument(span),
        );
    }

    async fn sweep_retention(&self) {
        match self.store.sweep_retention().await {
            Ok(0) => {}
            Ok(evicted) => {
                metrics::record_evicted(evicted);
                debug!(evicted, "Retention sweep evicted finished jobs");
            }
            Err(e) => warn!(error = %e, "Retention sweep failed"),
        }
    }

    async fn recover_stalled(&self) {
        for queue in &self.config.queues {
            match self.store.requeue_stalled(queue, self.config.lease_timeout()).await {
                Ok(0) => {}
                Ok(count) => QueueMetrics::new(queue).stalled_requeued(count),
                Err(e) => debug!(queue = %queue, error = %e, "Error requeuing stalled jobs"),
            }
        }
    }
}

/// Everything one attempt needs, moved into its task.
struct Execution {
    store: Arc<dyn JobStore>,
    events: EventBus,
    handler: Option<JobHandler>,
    timeout: Option<Duration>,
    metrics: QueueMetrics,
}

impl Execution {
    async fn run(self, job: Job) {
        self.metrics.job_claimed();
        debug!("Processing job");

        let started = Instant::now();
        let outcome = match self.handler.clone() {
            Some(handler) => run_handler(handler, job.clone(), self.timeout).await,
            None => Err(JobError::failed(format!("no handler registered for queue '{}'", job.queue))),
        };
        let duration = started.elapsed();

        match outcome {
            Ok(value) => self.complete(&job, value, duration).await,
            Err(err) => self.fail(&job, err, duration).await,
        }
    }

    async fn complete(&self, job: &Job, value: serde_json::Value, duration: Duration) {
        let result = (!value.is_null()).then_some(value);
        if let Err(e) = self.store.mark_completed(&job.queue, job.id, result).await {
            // The job stays active; stalled recovery runs it again.
            error!(error = %e, "Failed to record job completion");
            return;
        }

        self.metrics.job_completed(duration);
        info!(duration_ms = duration.as_millis() as u64, "Job completed");
        self.events.publish(JobEvent::Completed {
            queue: job.queue.clone(),
            job_id: job.id,
            attempts_made: job.attempts_made + 1,
            duration_ms: duration.as_millis() as u64,
            finished_at: Utc::now(),
        });
    }

    async fn fail(&self, job: &Job, err: JobError, duration: Duration) {
        let message = err.to_string();
        let outcome = match self.store.mark_failed(&job.queue, job.id, &message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, job_error = %message, "Failed to record job failure");
                return;
            }
        };

        self.metrics.job_failed(err.kind(), outcome.will_retry(), duration);
        if outcome.will_retry() {
            warn!(
                error = %message,
                error_kind = err.kind(),
                attempts_made = outcome.attempts_made(),
                max_attempts = job.max_attempts,
                "Job attempt failed, scheduled for retry"
            );
        } else {
            error!(
                error = %message,
                error_kind = err.kind(),
                attempts_made = outcome.attempts_made(),
                "Job failed permanently"
            );
        }

        self.events.publish(JobEvent::Failed {
            queue: job.queue.clone(),
            job_id: job.id,
            attempts_made: outcome.attempts_made(),
            max_attempts: job.max_attempts,
            error: message,
            will_retry: outcome.will_retry(),
            duration_ms: duration.as_millis() as u64,
            finished_at: Utc::now(),
        });
    }
}

/// Run the handler in its own task so a panic is contained, bounded by `timeout`.
async fn run_handler(handler: JobHandler, job: Job, timeout: Option<Duration>) -> HandlerResult {
    let task = tokio::spawn(handler(job));
    let abort = task.abort_handle();

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(JobError::Timeout(limit));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(JobError::failed(format!("handler task cancelled: {}", e))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, JobState, NewJob};
    use crate::store::MemoryJobStore;
    use serde_json::json;

    fn new_job(queue: &str, max_attempts: u32) -> NewJob {
        NewJob {
            queue: queue.into(),
            payload: json!({}),
            max_attempts,
            backoff: Default::default(),
            retention: Default::default(),
            delay: None,
        }
    }

    fn worker(store: Arc<MemoryJobStore>, registry: HandlerRegistry) -> JobWorker {
        let config = WorkerConfig::new("q").with_concurrency(4).with_handler_timeout_ms(Some(50));
        JobWorker::new(store, registry, config)
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42)), "unknown panic");
    }

    #[tokio::test]
    async fn test_missing_handler_is_rejected() {
        let store = Arc::new(MemoryJobStore::new());
        let worker = worker(store, HandlerRegistry::new());

        let (_tx, rx) = watch::channel(false);
        let err = worker.run(rx).await.unwrap_err();
        assert!(matches!(err, QueueError::NoHandler(q) if q == "q"));
    }

    #[tokio::test]
    async fn test_success_completes_and_emits_event() {
        let store = Arc::new(MemoryJobStore::new());
        let id = store.enqueue(new_job("q", 3)).await.unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("q", |_job: Job| async { Ok(json!({"sent": 3})) });
        let worker = worker(store.clone(), registry);
        let mut events = worker.subscribe();

        assert_eq!(worker.run_until_idle().await.unwrap(), 1);

        let job = store.get("q", id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts_made, 1);
        assert_eq!(job.result, Some(json!({"sent": 3})));

        let event = events.recv().await.unwrap();
        assert_eq!(event.name(), "job.completed");
        assert_eq!(event.job_id(), id);
    }

    #[tokio::test]
    async fn test_panic_and_timeout_fail_the_attempt() {
        let store = Arc::new(MemoryJobStore::new());
        store.enqueue(new_job("q", 1)).await.unwrap();
        store.enqueue(new_job("q", 1)).await.unwrap();
        store.enqueue(new_job("q", 1)).await.unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("q", |job: Job| async move {
            match job.id.0 {
                1 => panic!("handler exploded"),
                2 => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!(null))
                }
                _ => Ok(json!(null)),
            }
        });
        let worker = worker(store.clone(), registry);

        worker.run_until_idle().await.unwrap();

        let panicked = store.get("q", JobId(1)).await.unwrap().unwrap();
        assert_eq!(panicked.state, JobState::Failed);
        assert!(panicked.last_error.unwrap().contains("handler exploded"));

        let timed_out = store.get("q", JobId(2)).await.unwrap().unwrap();
        assert_eq!(timed_out.state, JobState::Failed);
        assert!(timed_out.last_error.unwrap().contains("timed out"));

        let fine = store.get("q", JobId(3)).await.unwrap().unwrap();
        assert_eq!(fine.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryJobStore::new());
        let mut registry = HandlerRegistry::new();
        registry.register("q", |_job: Job| async { Ok(json!(null)) });
        let worker = Arc::new(worker(store.clone(), registry));
        let mut events = worker.subscribe();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run(rx).await }
        });

        let id = store.enqueue(new_job("q", 3)).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.job_id(), id);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
