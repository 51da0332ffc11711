//! Notification dispatcher for invitation and password-setup emails.
//!
//! Notification failure never rolls back lifecycle state. Implementations
//! report the outcome instead of returning an error.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::models::InvitationRole;

/// Template data for the invitation email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationNotice {
    pub invite_url: String,
    pub role: InvitationRole,
}

/// Template data for the password-setup email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordSetupNotice {
    pub reset_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Result of a notification send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationResult {
    /// Message was accepted by the transport.
    Sent,
    /// Sending failed (but was non-blocking).
    Failed(String),
    /// Sending is disabled by configuration.
    Skipped,
}

impl NotificationResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, NotificationResult::Sent)
    }
}

#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_invitation(&self, to: &str, notice: InvitationNotice) -> NotificationResult;

    async fn send_password_setup(&self, to: &str, notice: PasswordSetupNotice)
        -> NotificationResult;
}

/// A message captured by [`MockNotificationDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotification {
    Invitation { to: String, notice: InvitationNotice },
    PasswordSetup { to: String, notice: PasswordSetupNotice },
}

/// Mock dispatcher for development and testing.
///
/// Records messages but doesn't send them.
#[derive(Debug, Default)]
pub struct MockNotificationDispatcher {
    /// Whether to simulate failures for testing.
    pub simulate_failure: bool,
    sent: Mutex<Vec<SentNotification>>,
}

impl MockNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock dispatcher that simulates failures.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            sent: Mutex::default(),
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Invite URLs sent to `to`, oldest first.
    pub fn invite_urls_for(&self, to: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|n| match n {
                SentNotification::Invitation { to: t, notice } if t == to => {
                    Some(notice.invite_url)
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, notification: SentNotification) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for MockNotificationDispatcher {
    async fn send_invitation(&self, to: &str, notice: InvitationNotice) -> NotificationResult {
        if self.simulate_failure {
            tracing::warn!(to = %to, "Mock dispatcher simulating failure");
            return NotificationResult::Failed("Simulated failure".to_string());
        }

        tracing::info!(to = %to, role = %notice.role, "Mock: Would send invitation email");
        self.record(SentNotification::Invitation {
            to: to.to_string(),
            notice,
        });
        NotificationResult::Sent
    }

    async fn send_password_setup(
        &self,
        to: &str,
        notice: PasswordSetupNotice,
    ) -> NotificationResult {
        if self.simulate_failure {
            tracing::warn!(to = %to, "Mock dispatcher simulating failure");
            return NotificationResult::Failed("Simulated failure".to_string());
        }

        tracing::info!(to = %to, "Mock: Would send password setup email");
        self.record(SentNotification::PasswordSetup {
            to: to.to_string(),
            notice,
        });
        NotificationResult::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_invitation() {
        let dispatcher = MockNotificationDispatcher::new();
        let result = dispatcher
            .send_invitation(
                "new@example.com",
                InvitationNotice {
                    invite_url: "http://app/invite?token=abc".to_string(),
                    role: InvitationRole::User,
                },
            )
            .await;

        assert!(result.is_sent());
        assert_eq!(
            dispatcher.invite_urls_for("new@example.com"),
            vec!["http://app/invite?token=abc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failing_mock_records_nothing() {
        let dispatcher = MockNotificationDispatcher::failing();
        let result = dispatcher
            .send_password_setup(
                "new@example.com",
                PasswordSetupNotice {
                    reset_url: "http://idp/reset".to_string(),
                    user_name: None,
                },
            )
            .await;

        assert!(matches!(result, NotificationResult::Failed(_)));
        assert!(dispatcher.sent().is_empty());
    }

    #[test]
    fn test_password_setup_notice_serialization() {
        let notice = PasswordSetupNotice {
            reset_url: "http://idp/reset".to_string(),
            user_name: None,
        };
        let json = serde_json::to_string(&notice).unwrap();
        assert!(!json.contains("user_name"));
    }
}
