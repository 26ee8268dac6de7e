//! Notifications Domain
//!
//! Confirmation emails are queued as one job per batch and sent in the
//! background by the email worker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │    API Handler      │  ← NotificationService::queue_confirmation_emails
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │  job-queue store    │  ← "email-queue", 3 attempts, exponential backoff
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │ NotificationDispatcher │  ← sends the batch concurrently
//! └──────────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │   Email Provider    │  ← SMTP (lettre) or mock
//! └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{EmailQueue, NotificationDispatcher, NotificationService, SmtpProvider};
//!
//! // API side
//! let service = NotificationService::new(producer);
//! service.queue_confirmation_emails("reader@example.com").await?;
//!
//! // Worker side
//! let dispatcher = NotificationDispatcher::new(SmtpProvider::new(smtp_config)?);
//! registry.register_processor::<EmailQueue, _>(Arc::new(dispatcher));
//! ```

pub mod error;
pub mod models;
pub mod processor;
pub mod providers;
pub mod queues;
pub mod service;

pub use error::{NotificationError, NotificationResult};
pub use models::{NotificationBatch, NotificationRequest};
pub use processor::NotificationDispatcher;
pub use providers::{EmailProvider, MockEmailProvider, SentEmail, SmtpConfig, SmtpProvider};
pub use queues::EmailQueue;
pub use service::{confirmation_batch, NotificationService};
