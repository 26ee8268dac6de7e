//! Job Queue
//!
//! A background job engine with at-least-once delivery.
//!
//! ## Features
//!
//! - **Durable stores**: `RedisJobStore` for production, `MemoryJobStore` for tests
//! - **Bounded retries**: fixed or exponential backoff, per-job `max_attempts`
//! - **Retention**: finished records trimmed by count and age
//! - **Concurrent worker**: `JobWorker` with panic isolation, timeouts and graceful shutdown
//! - **Events and metrics**: `job.completed` / `job.failed` events, Prometheus counters
//! - **Health endpoints**: K8s-ready liveness and readiness probes
//!
//! ## Example
//!
//! ```ignore
//! use job_queue::{HandlerRegistry, JobOptions, JobProducer, JobWorker, QueueDefaults, WorkerConfig};
//!
//! let store = Arc::new(RedisJobStore::connect("redis://127.0.0.1/").await?);
//!
//! // Producer side
//! let producer = JobProducer::new(store.clone(), QueueDefaults::default());
//! producer.enqueue("email-queue", &batch, JobOptions::new()).await?;
//!
//! // Worker side
//! let mut registry = HandlerRegistry::new();
//! registry.register_typed("email-queue", |batch: NotificationBatch| async move { send(batch).await });
//! let worker = JobWorker::new(store, registry, WorkerConfig::new("email-queue"));
//! worker.run(shutdown_rx).await?;
//! ```

pub mod backoff;
pub mod clock;
mod config;
mod error;
mod events;
mod health;
mod job;
pub mod metrics;
mod producer;
mod registry;
pub mod retention;
pub mod store;
mod worker;

// Re-export main types
pub use backoff::{compute_delay, BackoffPolicy, RetryDecision};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{QueueDefaults, WorkerConfig, DEFAULT_MAX_ATTEMPTS};
pub use error::{JobError, QueueError, QueueResult};
pub use events::{EventBus, JobEvent};
pub use health::{health_router, HealthResponse, HealthState};
pub use job::{FailureOutcome, Job, JobCounts, JobId, JobOptions, JobPayload, JobState, NewJob, ResolvedOptions};
pub use metrics::{init_metrics, QueueMetrics};
pub use producer::JobProducer;
pub use registry::{HandlerRegistry, HandlerResult, JobHandler, JobProcessor, QueueDef};
pub use retention::RetentionPolicy;
pub use store::{JobStore, MemoryJobStore, RedisJobStore, DEFAULT_KEY_PREFIX};
pub use worker::JobWorker;
