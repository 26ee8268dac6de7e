//! Where notification emails go.
//!
//! `SmtpProvider` sends through an SMTP relay; `MockEmailProvider` records
//! messages in memory and fails on demand.

mod mock;
mod smtp;

pub use mock::MockEmailProvider;
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::NotificationResult;
use crate::models::NotificationRequest;
use async_trait::async_trait;

/// Receipt for one handed-off message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Id assigned by the relay, when it reports one.
    pub message_id: Option<String>,
    pub accepted: bool,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send one email with an HTML body.
    async fn send(&self, email: &NotificationRequest) -> NotificationResult<SentEmail>;

    fn name(&self) -> &'static str;

    /// `Ok(true)` when the relay accepts a connection.
    async fn health_check(&self) -> NotificationResult<bool>;
}
