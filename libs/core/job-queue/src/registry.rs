//! Queue definitions and handler registration.
//!
//! This module provides:
//! - `QueueDef` trait for domain-specific queue definitions
//! - `JobProcessor` trait for struct-based handlers
//! - `HandlerRegistry` mapping queue names to handlers

use crate::error::JobError;
use crate::job::Job;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Queue definition trait.
///
/// Each domain implements this trait to name its queue and tune the worker
/// consuming it.
///
/// # Example
///
/// ```rust,ignore
/// use job_queue::QueueDef;
///
/// pub struct EmailQueue;
///
/// impl QueueDef for EmailQueue {
///     const QUEUE_NAME: &'static str = "email-queue";
/// }
/// ```
pub trait QueueDef: Send + Sync {
    /// The queue name (e.g., "email-queue").
    const QUEUE_NAME: &'static str;

    /// Jobs executed at once by a worker consuming only this queue.
    const CONCURRENCY: usize = 1;

    /// Poll interval when the queue is idle.
    const POLL_INTERVAL_MS: u64 = 1000;

    /// Get the queue name.
    fn queue_name() -> &'static str {
        Self::QUEUE_NAME
    }
}

/// Result of a handler attempt. `Ok` carries the value stored with the job.
pub type HandlerResult = Result<serde_json::Value, JobError>;

/// Type-erased handler invoked once per attempt.
pub type JobHandler = Arc<dyn Fn(Job) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Trait for struct-based job processors.
///
/// # Example
///
/// ```rust,ignore
/// struct DigestProcessor { mailer: Arc<dyn Mailer> }
///
/// #[async_trait]
/// impl JobProcessor for DigestProcessor {
///     async fn process(&self, job: &Job) -> Result<serde_json::Value, JobError> {
///         let digest: Digest = job.payload_as()?;
///         self.mailer.send(&digest).await.map_err(JobError::failed)?;
///         Ok(serde_json::Value::Null)
///     }
///
///     fn name(&self) -> &'static str {
///         "DigestProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Process a single attempt of a job.
    async fn process(&self, job: &Job) -> HandlerResult;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;

    /// Health check for the processor.
    ///
    /// Override to check external services. Default: always healthy.
    async fn health_check(&self) -> Result<bool, JobError> {
        Ok(true)
    }
}

/// Handlers keyed by queue name. At most one handler per queue.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, JobHandler>,
    processors: Vec<Arc<dyn JobProcessor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `queue`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, queue: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let queue = queue.into();
        debug!(queue = %queue, "Registered job handler");
        let handler: JobHandler = Arc::new(move |job| Box::pin(handler(job)));
        self.handlers.insert(queue, handler);
        self
    }

    /// Register a handler that receives the decoded payload.
    ///
    /// A payload that does not decode into `T` fails the attempt with
    /// [`JobError::Payload`].
    pub fn register_typed<T, R, F, Fut>(&mut self, queue: impl Into<String>, handler: F) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, JobError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(queue, move |job: Job| {
            let handler = Arc::clone(&handler);
            async move {
                let input: T = job.payload_as()?;
                let output = handler(input).await?;
                Ok::<_, JobError>(serde_json::to_value(output)?)
            }
        })
    }

    /// Register a [`JobProcessor`] for the queue named by `Q`.
    pub fn register_processor<Q, P>(&mut self, processor: Arc<P>) -> &mut Self
    where
        Q: QueueDef,
        P: JobProcessor + 'static,
    {
        self.register_processor_on(Q::QUEUE_NAME, processor)
    }

    /// Register a [`JobProcessor`] under an explicit queue name.
    pub fn register_processor_on<P>(&mut self, queue: impl Into<String>, processor: Arc<P>) -> &mut Self
    where
        P: JobProcessor + 'static,
    {
        self.processors.push(processor.clone());
        self.register(queue, move |job: Job| {
            let processor = Arc::clone(&processor);
            async move { processor.process(&job).await }
        })
    }

    /// Get the handler for `queue`.
    pub fn get(&self, queue: &str) -> Option<JobHandler> {
        self.handlers.get(queue).cloned()
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.handlers.contains_key(queue)
    }

    /// Registered queue names.
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.handlers.keys().cloned().collect();
        queues.sort();
        queues
    }

    /// Run the health check of every registered processor.
    pub async fn health_check(&self) -> Vec<(&'static str, bool)> {
        let mut results = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            let healthy = processor.health_check().await.unwrap_or(false);
            results.push((processor.name(), healthy));
        }
        results
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("queues", &self.queues())
            .finish()
    }
}
