//! Persistence seam for invitations and the accounts they produce.
//!
//! The Postgres implementation lives in the persistence crate. The in-memory
//! implementation here mirrors its transactional guarantees under a single
//! mutex and is what the controller tests run against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::invitation::InvitationWithInviter;
use crate::models::{Account, Invitation, NewAccount, NewInvitation};

/// What `create` does with an existing unused invitation for the same email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupersedePolicy {
    /// Delete every unused invitation for the email, then insert.
    Supersede,
    /// Fail with `Conflict` if an active invitation exists; stale rows are removed.
    Reject,
}

/// Result of the atomic redeem transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed(Account),
    AlreadyUsed,
    Expired,
    Missing,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An active invitation already exists for this email")]
    Conflict,

    #[error("An account with this email already exists")]
    DuplicateAccount,

    #[error("Database error: {0}")]
    Database(String),
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Unused invitation for `email` with `expires_at > now`, if any.
    async fn find_active_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError>;

    /// Persists a new invitation, enforcing one unused invitation per email.
    async fn create(
        &self,
        invitation: NewInvitation,
        policy: SupersedePolicy,
    ) -> Result<Invitation, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError>;

    /// Marks the invitation used and creates the local account in one
    /// transaction. Nothing is written unless the invitation is redeemable.
    async fn redeem(
        &self,
        invitation_id: Uuid,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StoreError>;

    /// Returns true if a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<InvitationWithInviter>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    invitations: HashMap<Uuid, Invitation>,
    accounts: HashMap<Uuid, Account>,
}

/// In-memory store with the same all-or-nothing semantics as the database.
#[derive(Debug, Default)]
pub struct InMemoryInvitationStore {
    state: Mutex<MemoryState>,
    fail_next_redeem: AtomicBool,
}

impl InMemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a local account, e.g. an administrator or a pre-existing user.
    pub fn insert_account(&self, account: Account) {
        self.lock().accounts.insert(account.id, account);
    }

    /// Makes the next `redeem` fail with a database error before writing.
    pub fn fail_next_redeem(&self) {
        self.fail_next_redeem.store(true, Ordering::SeqCst);
    }

    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }

    pub fn invitation_count(&self) -> usize {
        self.lock().invitations.len()
    }

    pub fn accounts_with_email(&self, email: &str) -> Vec<Account> {
        self.lock()
            .accounts
            .values()
            .filter(|a| a.email == email)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl InvitationStore for InMemoryInvitationStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .lock()
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.lock().accounts.get(&id).cloned())
    }

    async fn find_active_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .values()
            .find(|i| i.email == email && !i.used && i.expires_at > now)
            .cloned())
    }

    async fn create(
        &self,
        invitation: NewInvitation,
        policy: SupersedePolicy,
    ) -> Result<Invitation, StoreError> {
        let mut state = self.lock();

        if state
            .invitations
            .values()
            .any(|i| i.token == invitation.token)
        {
            return Err(StoreError::Conflict);
        }

        if policy == SupersedePolicy::Reject
            && state.invitations.values().any(|i| {
                i.email == invitation.email && !i.used && i.expires_at > invitation.created_at
            })
        {
            return Err(StoreError::Conflict);
        }

        state
            .invitations
            .retain(|_, i| !(i.email == invitation.email && !i.used));

        let stored = Invitation {
            id: Uuid::new_v4(),
            email: invitation.email,
            role: invitation.role,
            token: invitation.token,
            invited_by: invitation.invited_by,
            expires_at: invitation.expires_at,
            used: false,
            used_at: None,
            created_at: invitation.created_at,
        };
        state.invitations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .values()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        Ok(self.lock().invitations.get(&id).cloned())
    }

    async fn redeem(
        &self,
        invitation_id: Uuid,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StoreError> {
        if self.fail_next_redeem.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected failure".to_string()));
        }

        let mut state = self.lock();

        let Some(invitation) = state.invitations.get(&invitation_id) else {
            return Ok(RedeemOutcome::Missing);
        };
        if invitation.used {
            return Ok(RedeemOutcome::AlreadyUsed);
        }
        if invitation.expires_at <= now {
            return Ok(RedeemOutcome::Expired);
        }
        if state.accounts.values().any(|a| a.email == account.email) {
            return Err(StoreError::DuplicateAccount);
        }

        let created = Account {
            id: Uuid::new_v4(),
            email: account.email,
            name: Some(account.name),
            role: account.role,
            external_id: account.external_id,
            email_verified: true,
            created_at: now,
            updated_at: now,
        };
        state.accounts.insert(created.id, created.clone());

        if let Some(invitation) = state.invitations.get_mut(&invitation_id) {
            invitation.used = true;
            invitation.used_at = Some(now);
        }

        Ok(RedeemOutcome::Redeemed(created))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock().invitations.remove(&id).is_some())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<InvitationWithInviter>, StoreError> {
        let state = self.lock();
        let mut invitations: Vec<&Invitation> = state.invitations.values().collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(invitations
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|i| {
                let inviter = state.accounts.get(&i.invited_by);
                InvitationWithInviter {
                    invitation: i.clone(),
                    inviter_name: inviter.and_then(|a| a.name.clone()),
                    inviter_email: inviter.map(|a| a.email.clone()),
                }
            })
            .collect())
    }
}
