use super::{EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::NotificationRequest;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    attempts: Vec<NotificationRequest>,
    sent: Vec<NotificationRequest>,
    // subject -> remaining failures (u32::MAX = always)
    failures: HashMap<String, u32>,
}

/// In-memory provider for tests. Records every send and fails the messages
/// it was told to fail.
#[derive(Debug, Default)]
pub struct MockEmailProvider {
    state: Mutex<MockState>,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` sends of messages with this subject.
    pub fn fail_subject(&self, subject: impl Into<String>, times: u32) -> &Self {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(subject.into(), times);
        }
        self
    }

    /// Fail every send of messages with this subject.
    pub fn always_fail_subject(&self, subject: impl Into<String>) -> &Self {
        self.fail_subject(subject, u32::MAX)
    }

    /// Every message handed to `send`, in call order.
    pub fn attempts(&self) -> Vec<NotificationRequest> {
        self.state.lock().map(|s| s.attempts.clone()).unwrap_or_default()
    }

    /// Messages that were accepted.
    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.state.lock().map(|s| s.sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, email: &NotificationRequest) -> NotificationResult<SentEmail> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NotificationError::ProviderError("mock provider lock poisoned".into()))?;
        state.attempts.push(email.clone());

        if let Some(remaining) = state.failures.get_mut(&email.subject) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(NotificationError::ProviderError(format!(
                    "mailbox unavailable for {}",
                    email.to_email
                )));
            }
        }

        state.sent.push(email.clone());
        Ok(SentEmail {
            message_id: Some(format!("mock-{}", state.sent.len())),
            accepted: true,
        })
    }

    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(true)
    }
}
