//! Data models for the notifications domain.

use job_queue::JobPayload;
use serde::{Deserialize, Serialize};

/// One email to send. Serialized as `{ toEmail, subject, body }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// Recipient email address.
    pub to_email: String,
    /// Email subject line.
    pub subject: String,
    /// HTML body.
    pub body: String,
}

impl NotificationRequest {
    pub fn new(
        to_email: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to_email: to_email.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Destination and subject must be present.
    pub fn validate(&self) -> Result<(), String> {
        if self.to_email.trim().is_empty() {
            return Err("destination email is empty".to_string());
        }
        if self.subject.trim().is_empty() {
            return Err(format!("subject is empty for {}", self.to_email));
        }
        Ok(())
    }
}

/// The payload of one email-queue job: an ordered list of messages that
/// succeeds or fails as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationBatch(pub Vec<NotificationRequest>);

impl NotificationBatch {
    pub fn new(messages: Vec<NotificationRequest>) -> Self {
        Self(messages)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NotificationRequest> {
        self.0.iter()
    }
}

impl FromIterator<NotificationRequest> for NotificationBatch {
    fn from_iter<I: IntoIterator<Item = NotificationRequest>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl JobPayload for NotificationBatch {
    fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("notification batch is empty".to_string());
        }
        for (idx, message) in self.iter().enumerate() {
            message
                .validate()
                .map_err(|e| format!("message #{}: {}", idx + 1, e))?;
        }
        Ok(())
    }
}
