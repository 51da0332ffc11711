//! Identity provider abstraction.
//!
//! The external system of record for credentials. It is an independent
//! failure domain: every call may fail, and a timed-out write may or may not
//! have been applied on the provider side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::InvitationRole;

/// Identity-provider user id, e.g. `auth0|65f0c...`.
pub type ExternalUserId = String;

/// URL the user follows to set their password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordChangeTicket {
    pub ticket_url: String,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("User already exists in identity provider")]
    AlreadyExists,

    #[error("Identity provider rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Identity provider request timed out")]
    Timeout,

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to obtain management token: {0}")]
    Token(String),

    #[error("Invalid identity provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// True when the request may have been applied despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ProviderError::Timeout)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn find_user_by_email(&self, email: &str)
        -> Result<Option<ExternalUserId>, ProviderError>;

    async fn user_exists(&self, email: &str) -> Result<bool, ProviderError> {
        Ok(self.find_user_by_email(email).await?.is_some())
    }

    /// Creates a verified user with a throwaway password and the role in
    /// its application metadata.
    async fn create_user(
        &self,
        email: &str,
        role: InvitationRole,
    ) -> Result<ExternalUserId, ProviderError>;

    async fn create_password_change_ticket(
        &self,
        external_id: &str,
        result_url: &str,
        ttl: Duration,
    ) -> Result<PasswordChangeTicket, ProviderError>;
}

/// Scripted failure for the next `create_user` call.
#[derive(Debug, Clone)]
pub enum CreateFailure {
    /// Fail without creating anything.
    Fail(ProviderError),
    /// Create the user, then report a timeout (ambiguous outcome).
    CommitThenTimeout,
}

#[derive(Debug, Default)]
struct MockState {
    users: HashMap<String, (ExternalUserId, InvitationRole)>,
    next_create_failure: Option<CreateFailure>,
    lookup_failure: Option<ProviderError>,
    ticket_failure: Option<ProviderError>,
    tickets: Vec<(ExternalUserId, String)>,
}

/// In-memory identity provider for development and testing.
#[derive(Debug, Default)]
pub struct MockIdentityProvider {
    state: Mutex<MockState>,
    create_calls: AtomicUsize,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing provider user and returns its id.
    pub fn seed_user(&self, email: &str, role: InvitationRole) -> ExternalUserId {
        let id = format!("auth0|seed-{}", email);
        self.lock()
            .users
            .insert(email.to_string(), (id.clone(), role));
        id
    }

    pub fn fail_next_create(&self, failure: CreateFailure) {
        self.lock().next_create_failure = Some(failure);
    }

    pub fn fail_lookups(&self, error: Option<ProviderError>) {
        self.lock().lookup_failure = error;
    }

    pub fn fail_tickets(&self, error: Option<ProviderError>) {
        self.lock().ticket_failure = error;
    }

    /// Number of `create_user` calls received, successful or not.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn role_of(&self, email: &str) -> Option<InvitationRole> {
        self.lock().users.get(email).map(|(_, role)| *role)
    }

    /// Tickets issued so far as `(external_id, result_url)`.
    pub fn tickets(&self) -> Vec<(ExternalUserId, String)> {
        self.lock().tickets.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ExternalUserId>, ProviderError> {
        let state = self.lock();
        if let Some(err) = &state.lookup_failure {
            return Err(err.clone());
        }
        Ok(state.users.get(email).map(|(id, _)| id.clone()))
    }

    async fn create_user(
        &self,
        email: &str,
        role: InvitationRole,
    ) -> Result<ExternalUserId, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let commit_then_timeout = match state.next_create_failure.take() {
            Some(CreateFailure::Fail(err)) => return Err(err),
            Some(CreateFailure::CommitThenTimeout) => true,
            None => false,
        };

        if state.users.contains_key(email) {
            return Err(ProviderError::AlreadyExists);
        }

        let id = format!("auth0|mock-{}", uuid::Uuid::new_v4().simple());
        state.users.insert(email.to_string(), (id.clone(), role));

        if commit_then_timeout {
            tracing::warn!(email = %email, "Mock identity provider simulating timeout after commit");
            return Err(ProviderError::Timeout);
        }

        Ok(id)
    }

    async fn create_password_change_ticket(
        &self,
        external_id: &str,
        result_url: &str,
        _ttl: Duration,
    ) -> Result<PasswordChangeTicket, ProviderError> {
        let mut state = self.lock();
        if let Some(err) = &state.ticket_failure {
            return Err(err.clone());
        }
        state
            .tickets
            .push((external_id.to_string(), result_url.to_string()));
        Ok(PasswordChangeTicket {
            ticket_url: format!(
                "https://idp.test/lo/reset?ticket={}",
                state.tickets.len()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_lookup() {
        let idp = MockIdentityProvider::new();
        let id = idp
            .create_user("new@example.com", InvitationRole::Admin)
            .await
            .unwrap();

        assert_eq!(
            idp.find_user_by_email("new@example.com").await.unwrap(),
            Some(id)
        );
        assert!(idp.user_exists("new@example.com").await.unwrap());
        assert_eq!(idp.role_of("new@example.com"), Some(InvitationRole::Admin));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_already_exists() {
        let idp = MockIdentityProvider::new();
        idp.seed_user("new@example.com", InvitationRole::User);

        let result = idp.create_user("new@example.com", InvitationRole::User).await;
        assert!(matches!(result, Err(ProviderError::AlreadyExists)));
        assert_eq!(idp.user_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_then_timeout_leaves_user_behind() {
        let idp = MockIdentityProvider::new();
        idp.fail_next_create(CreateFailure::CommitThenTimeout);

        let result = idp.create_user("new@example.com", InvitationRole::User).await;
        let err = result.unwrap_err();
        assert!(err.is_ambiguous());
        assert!(idp.user_exists("new@example.com").await.unwrap());
    }

    #[test]
    fn test_ambiguity_classification() {
        assert!(ProviderError::Timeout.is_ambiguous());
        assert!(!ProviderError::AlreadyExists.is_ambiguous());
        assert!(!ProviderError::Unavailable("refused".into()).is_ambiguous());
        assert!(!ProviderError::Rejected {
            status: 400,
            body: "bad".into()
        }
        .is_ambiguous());
    }
}
