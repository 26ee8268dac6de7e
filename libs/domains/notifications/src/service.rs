//! Producer-side facade used by request handlers to queue emails.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{NotificationBatch, NotificationRequest};
use crate::queues::EmailQueue;
use job_queue::{JobId, JobOptions, JobPayload, JobProducer, QueueDef};
use tracing::info;

/// Queues notification batches on the email queue.
///
/// Returns as soon as the job is stored; sending happens in the worker.
#[derive(Clone)]
pub struct NotificationService {
    producer: JobProducer,
    queue: String,
}

impl NotificationService {
    pub fn new(producer: JobProducer) -> Self {
        Self {
            producer,
            queue: EmailQueue::QUEUE_NAME.to_string(),
        }
    }

    /// Queue on a different queue name (tests, staging isolation).
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Queue a batch as one job.
    pub async fn queue_batch(
        &self,
        batch: &NotificationBatch,
        options: JobOptions,
    ) -> NotificationResult<JobId> {
        batch.validate().map_err(NotificationError::InvalidRequest)?;

        let id = self.producer.enqueue(&self.queue, batch, options).await?;

        info!(job_id = %id, queue = %self.queue, messages = batch.len(), "Queued notification batch");
        Ok(id)
    }

    /// Queue a single email.
    pub async fn queue_email(&self, request: NotificationRequest) -> NotificationResult<JobId> {
        self.queue_batch(&NotificationBatch::new(vec![request]), JobOptions::new())
            .await
    }

    /// Queue the registration confirmation sequence for a new reader.
    pub async fn queue_confirmation_emails(&self, to_email: &str) -> NotificationResult<JobId> {
        self.queue_batch(&confirmation_batch(to_email), JobOptions::new())
            .await
    }
}

/// The three-message sequence sent after registration.
pub fn confirmation_batch(to_email: &str) -> NotificationBatch {
    NotificationBatch::new(vec![
        NotificationRequest::new(
            to_email,
            "Registration received",
            "<h1>Thanks for registering</h1><p>Your account is being set up.</p>",
        ),
        NotificationRequest::new(
            to_email,
            "Your account is ready",
            "<h1>Your account is ready</h1><p>You can now log in and publish news.</p>",
        ),
        NotificationRequest::new(
            to_email,
            "Welcome to the newsdesk",
            "<h1>Welcome</h1><p>Tell us what you want to read about in your profile.</p>",
        ),
    ])
}
