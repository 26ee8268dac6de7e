//! Email-queue job handler.
//!
//! `NotificationDispatcher` implements `JobProcessor`: it decodes a
//! [`NotificationBatch`], sends every message concurrently and fails the
//! attempt if any message fails. A retry resends the whole batch.

use crate::error::{NotificationError, NotificationResult};
use crate::models::NotificationBatch;
use crate::providers::{EmailProvider, SentEmail};
use async_trait::async_trait;
use futures::future::join_all;
use job_queue::{HandlerResult, Job, JobError, JobPayload, JobProcessor};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Sends notification batches through an [`EmailProvider`].
pub struct NotificationDispatcher<P: EmailProvider> {
    provider: Arc<P>,
}

impl<P: EmailProvider + 'static> NotificationDispatcher<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    /// Create a dispatcher sharing an existing provider.
    pub fn with_arc(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Get a reference to the email provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Send every message of `batch` concurrently.
    ///
    /// Succeeds only when all messages were sent; otherwise returns
    /// [`NotificationError::PartialBatch`] carrying the first failure in
    /// batch order.
    pub async fn dispatch(&self, batch: &NotificationBatch) -> NotificationResult<Vec<SentEmail>> {
        let results = join_all(batch.iter().map(|message| self.provider.send(message))).await;

        let total = results.len();
        let mut sent = Vec::with_capacity(total);
        let mut first_error = None;
        let mut failed = 0;

        for (message, result) in batch.iter().zip(results) {
            match result {
                Ok(receipt) => sent.push(receipt),
                Err(e) => {
                    warn!(
                        to = %message.to_email,
                        subject = %message.subject,
                        provider = self.provider.name(),
                        error = %e,
                        "Email in batch failed"
                    );
                    failed += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        match first_error {
            None => Ok(sent),
            Some(first_error) => Err(NotificationError::PartialBatch {
                failed,
                total,
                first_error,
            }),
        }
    }
}

#[async_trait]
impl<P: EmailProvider + 'static> JobProcessor for NotificationDispatcher<P> {
    async fn process(&self, job: &Job) -> HandlerResult {
        let batch: NotificationBatch = job.payload_as()?;
        batch.validate().map_err(JobError::Payload)?;

        info!(
            job_id = %job.id,
            queue = %job.queue,
            messages = batch.len(),
            attempt = job.attempts_made + 1,
            "Dispatching notification batch"
        );

        let sent = self.dispatch(&batch).await?;

        let message_ids: Vec<_> = sent.iter().filter_map(|s| s.message_id.clone()).collect();
        Ok(json!({ "sent": sent.len(), "messageIds": message_ids }))
    }

    fn name(&self) -> &'static str {
        "NotificationDispatcher"
    }

    async fn health_check(&self) -> Result<bool, JobError> {
        self.provider
            .health_check()
            .await
            .map_err(|e| JobError::failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationRequest;
    use crate::providers::MockEmailProvider;

    fn batch() -> NotificationBatch {
        ["first", "second", "last"]
            .into_iter()
            .map(|s| NotificationRequest::new("reader@example.com", s, format!("<h1>{}</h1>", s)))
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_all_sent() {
        let dispatcher = NotificationDispatcher::new(MockEmailProvider::new());

        let sent = dispatcher.dispatch(&batch()).await.unwrap();

        assert_eq!(sent.len(), 3);
        assert_eq!(dispatcher.provider().sent().len(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_partial_failure() {
        let provider = MockEmailProvider::new();
        provider.always_fail_subject("second");
        let dispatcher = NotificationDispatcher::new(provider);

        let err = dispatcher.dispatch(&batch()).await.unwrap_err();

        match err {
            NotificationError::PartialBatch { failed, total, first_error } => {
                assert_eq!((failed, total), (1, 3));
                assert!(first_error.contains("mailbox unavailable"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        // The other two still went out
        assert_eq!(dispatcher.provider().sent().len(), 2);
    }

    #[tokio::test]
    async fn test_processor_name_and_health() {
        let dispatcher = NotificationDispatcher::new(MockEmailProvider::new());
        assert_eq!(dispatcher.name(), "NotificationDispatcher");
        assert!(dispatcher.health_check().await.unwrap());
    }
}
