//! Queue definitions for the notifications domain.

use job_queue::QueueDef;

/// Email jobs queue.
///
/// Consumed by the email-worker; each job carries a `NotificationBatch`.
pub struct EmailQueue;

impl QueueDef for EmailQueue {
    const QUEUE_NAME: &'static str = "email-queue";
}
