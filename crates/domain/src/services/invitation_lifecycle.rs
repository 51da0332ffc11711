//! Invitation lifecycle controller.
//!
//! Owns the `ACTIVE -> {REDEEMED | EXPIRED | CANCELLED}` state machine and the
//! consistency protocol between the identity provider and the local store.
//!
//! Redemption is a two-system saga: the identity-provider account is created
//! first, then the local account and the `used` flag are written in one store
//! transaction. A failure between the two leaves the invitation `ACTIVE`; the
//! retry finds the provider account through the existence check and reuses it
//! instead of creating a second one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use shared::crypto::{generate_invitation_token, is_invitation_token_shape, token_fingerprint};
use shared::validation::{normalize_email, validate_email_address};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::identity_provider::{ExternalUserId, IdentityProvider, ProviderError};
use super::invitation_store::{InvitationStore, RedeemOutcome, StoreError, SupersedePolicy};
use super::notification::{
    InvitationNotice, NotificationDispatcher, NotificationResult, PasswordSetupNotice,
};
use crate::models::invitation::{
    invite_url, InvitationSummary, InviterInfo, VerifyInvitationResponse,
};
use crate::models::{Account, Invitation, InvitationRole, InvitationStatus, NewAccount, NewInvitation};

pub const INVALID_TOKEN_MESSAGE: &str = "Invalid invitation token";
pub const ALREADY_USED_MESSAGE: &str = "Invitation already used";
pub const EXPIRED_MESSAGE: &str = "Invitation has expired";

#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("An account with this email already exists")]
    DuplicateAccount,

    #[error("An active invitation already exists for this email")]
    Conflict,

    #[error("{}", INVALID_TOKEN_MESSAGE)]
    InvalidToken,

    #[error("{}", ALREADY_USED_MESSAGE)]
    AlreadyUsed,

    #[error("{}", EXPIRED_MESSAGE)]
    Expired,

    #[error("{0}")]
    NotFound(String),

    #[error("User has no identity provider account")]
    NotProvisioned,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for InvitationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => InvitationError::Conflict,
            StoreError::DuplicateAccount => InvitationError::DuplicateAccount,
            StoreError::Database(msg) => InvitationError::Persistence(msg),
        }
    }
}

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct InvitationSettings {
    /// Lifetime of a new invitation.
    pub expiry: Duration,
    /// Base URL invite links are built from.
    pub app_base_url: String,
    /// Where the provider sends the user after the password is set.
    pub password_setup_result_url: String,
    pub password_ticket_ttl: std::time::Duration,
    /// Upper bound on the password-setup step that follows a committed
    /// redemption. Must stay below the HTTP request timeout.
    pub password_setup_budget: std::time::Duration,
}

impl Default for InvitationSettings {
    fn default() -> Self {
        Self {
            expiry: Duration::hours(48),
            app_base_url: "http://localhost:3000".to_string(),
            password_setup_result_url: "http://localhost:3000/api/auth/signin".to_string(),
            password_ticket_ttl: std::time::Duration::from_secs(7 * 24 * 3600),
            password_setup_budget: std::time::Duration::from_secs(10),
        }
    }
}

/// Outcome of validating a token. A pure read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    Valid { email: String, role: InvitationRole },
    Invalid,
    AlreadyUsed,
    Expired,
}

impl TokenValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValidation::Valid { .. })
    }

    pub fn message(&self) -> Option<&'static str> {
        match self {
            TokenValidation::Valid { .. } => None,
            TokenValidation::Invalid => Some(INVALID_TOKEN_MESSAGE),
            TokenValidation::AlreadyUsed => Some(ALREADY_USED_MESSAGE),
            TokenValidation::Expired => Some(EXPIRED_MESSAGE),
        }
    }

    /// Short label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            TokenValidation::Valid { .. } => "valid",
            TokenValidation::Invalid => "invalid",
            TokenValidation::AlreadyUsed => "already_used",
            TokenValidation::Expired => "expired",
        }
    }
}

impl From<TokenValidation> for VerifyInvitationResponse {
    fn from(validation: TokenValidation) -> Self {
        let message = validation.message().map(str::to_string);
        match validation {
            TokenValidation::Valid { email, role } => VerifyInvitationResponse {
                valid: true,
                email: Some(email),
                role: Some(role),
                message: None,
            },
            _ => VerifyInvitationResponse {
                valid: false,
                email: None,
                role: None,
                message,
            },
        }
    }
}

/// Result of a successful issue.
#[derive(Debug, Clone)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub invite_url: String,
    pub notification: NotificationResult,
}

/// Result of a successful redemption.
#[derive(Debug, Clone)]
pub struct RedeemedInvitation {
    pub account: Account,
    /// True when an identity-provider account left by an earlier partial
    /// failure was reused instead of created.
    pub reconciled: bool,
    pub password_setup: NotificationResult,
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds the per-token redemption lock; removes the map entry on drop once
/// nobody else is waiting on it.
struct RedemptionPermit<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    token: String,
    locks: &'a LockMap,
}

impl Drop for RedemptionPermit<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) <= 2 {
            if let Some(existing) = locks.get(&self.token) {
                if Arc::ptr_eq(existing, &self.lock) {
                    locks.remove(&self.token);
                }
            }
        }
    }
}

/// Orchestrates issuance, validation, redemption and cancellation.
pub struct InvitationService {
    store: Arc<dyn InvitationStore>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    settings: InvitationSettings,
    redemption_locks: LockMap,
}

impl InvitationService {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        settings: InvitationSettings,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            clock,
            settings,
            redemption_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &InvitationSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Issues a new invitation, superseding any unused one for the email.
    ///
    /// Fails with `DuplicateAccount` before a token is generated if either
    /// system of record already knows the address. A failed notification is
    /// reported in the result; the invitation stays valid.
    pub async fn issue(
        &self,
        email: &str,
        role: InvitationRole,
        invited_by: Uuid,
    ) -> Result<IssuedInvitation, InvitationError> {
        let email = normalize_email(email);
        validate_email_address(&email)
            .map_err(|_| InvitationError::Validation("Invalid email address".to_string()))?;

        if self.store.find_account_by_email(&email).await?.is_some() {
            info!(email = %email, "Invitation refused: local account exists");
            return Err(InvitationError::DuplicateAccount);
        }

        if self.identity.user_exists(&email).await? {
            info!(email = %email, "Invitation refused: identity provider account exists");
            return Err(InvitationError::DuplicateAccount);
        }

        let now = self.clock.now();
        let invitation = self
            .store
            .create(
                NewInvitation {
                    email,
                    role,
                    token: generate_invitation_token(),
                    invited_by,
                    expires_at: now + self.settings.expiry,
                    created_at: now,
                },
                SupersedePolicy::Supersede,
            )
            .await?;

        let url = invite_url(&self.settings.app_base_url, &invitation.token);
        let notification = self
            .notifier
            .send_invitation(
                &invitation.email,
                InvitationNotice {
                    invite_url: url.clone(),
                    role,
                },
            )
            .await;

        if let NotificationResult::Failed(reason) = &notification {
            warn!(
                invitation_id = %invitation.id,
                email = %invitation.email,
                error = %reason,
                "Failed to send invitation email; invitation remains valid"
            );
        }

        info!(
            invitation_id = %invitation.id,
            email = %invitation.email,
            role = %invitation.role,
            invited_by = %invited_by,
            token = %token_fingerprint(&invitation.token),
            expires_at = %invitation.expires_at,
            "Invitation issued"
        );

        Ok(IssuedInvitation {
            invitation,
            invite_url: url,
            notification,
        })
    }

    /// Reports whether `token` is currently redeemable. Writes nothing.
    pub async fn validate(&self, token: &str) -> Result<TokenValidation, InvitationError> {
        if !is_invitation_token_shape(token) {
            return Ok(TokenValidation::Invalid);
        }

        let Some(invitation) = self.store.find_by_token(token).await? else {
            return Ok(TokenValidation::Invalid);
        };

        Ok(match invitation.status_at(self.clock.now()) {
            InvitationStatus::Expired => TokenValidation::Expired,
            InvitationStatus::Redeemed => TokenValidation::AlreadyUsed,
            InvitationStatus::Active => TokenValidation::Valid {
                email: invitation.email,
                role: invitation.role,
            },
        })
    }

    /// Redeems `token` exactly once.
    ///
    /// Concurrent calls for the same token are serialized in-process; across
    /// processes the store's conditional update decides the winner.
    pub async fn redeem(&self, token: &str) -> Result<RedeemedInvitation, InvitationError> {
        if !is_invitation_token_shape(token) {
            return Err(InvitationError::InvalidToken);
        }

        let permit = self.acquire_redemption(token).await;

        let invitation = self
            .store
            .find_by_token(token)
            .await?
            .ok_or(InvitationError::InvalidToken)?;

        match invitation.status_at(self.clock.now()) {
            InvitationStatus::Expired => return Err(InvitationError::Expired),
            InvitationStatus::Redeemed => return Err(InvitationError::AlreadyUsed),
            InvitationStatus::Active => {}
        }

        let (external_id, reconciled) = self.ensure_identity_account(&invitation).await?;

        let new_account = NewAccount::from_invitation(
            &invitation.email,
            invitation.role,
            Some(external_id.clone()),
        );

        let account = match self
            .store
            .redeem(invitation.id, new_account, self.clock.now())
            .await
        {
            Ok(RedeemOutcome::Redeemed(account)) => account,
            Ok(RedeemOutcome::AlreadyUsed) => return Err(InvitationError::AlreadyUsed),
            Ok(RedeemOutcome::Expired) => return Err(InvitationError::Expired),
            Ok(RedeemOutcome::Missing) => return Err(InvitationError::InvalidToken),
            Err(err) => {
                error!(
                    invitation_id = %invitation.id,
                    external_id = %external_id,
                    error = %err,
                    "Local account creation failed after identity provider account was ensured; retry will reconcile"
                );
                return Err(err.into());
            }
        };
        drop(permit);

        info!(
            invitation_id = %invitation.id,
            account_id = %account.id,
            email = %account.email,
            role = %account.role,
            reconciled,
            "Invitation redeemed"
        );

        // The account exists from here on; a slow ticket or email must not
        // turn the committed redemption into a failed request.
        let password_setup = match tokio::time::timeout(
            self.settings.password_setup_budget,
            self.dispatch_password_setup(&account, &external_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    account_id = %account.id,
                    budget_ms = self.settings.password_setup_budget.as_millis() as u64,
                    "Password setup step timed out after redemption"
                );
                NotificationResult::Failed("password setup timed out".to_string())
            }
        };

        Ok(RedeemedInvitation {
            account,
            reconciled,
            password_setup,
        })
    }

    /// Deletes an invitation. Idempotent; returns whether a row was removed.
    pub async fn cancel(&self, invitation_id: Uuid) -> Result<bool, InvitationError> {
        let removed = self.store.delete(invitation_id).await?;
        if removed {
            info!(invitation_id = %invitation_id, "Invitation cancelled");
        }
        Ok(removed)
    }

    /// Admin listing, newest first, with inviter details and invite links.
    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvitationSummary>, InvitationError> {
        let now = self.clock.now();
        let rows = self.store.list(limit, offset).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let inv = row.invitation;
                InvitationSummary {
                    id: inv.id,
                    status: inv.status_at(now),
                    invite_url: invite_url(&self.settings.app_base_url, &inv.token),
                    email: inv.email,
                    role: inv.role,
                    expires_at: inv.expires_at,
                    used_at: inv.used_at,
                    created_at: inv.created_at,
                    invited_by: InviterInfo {
                        id: inv.invited_by,
                        name: row.inviter_name,
                        email: row.inviter_email,
                    },
                }
            })
            .collect())
    }

    /// Sends a fresh password-setup link to an existing account.
    pub async fn resend_password_setup(
        &self,
        account_id: Uuid,
    ) -> Result<NotificationResult, InvitationError> {
        let account = self
            .store
            .find_account_by_id(account_id)
            .await?
            .ok_or_else(|| InvitationError::NotFound("User not found".to_string()))?;

        let external_id = account
            .external_id
            .clone()
            .ok_or(InvitationError::NotProvisioned)?;

        let ticket = self
            .identity
            .create_password_change_ticket(
                &external_id,
                &self.settings.password_setup_result_url,
                self.settings.password_ticket_ttl,
            )
            .await?;

        let result = self
            .notifier
            .send_password_setup(
                &account.email,
                PasswordSetupNotice {
                    reset_url: ticket.ticket_url,
                    user_name: Some(account.display_name().to_string()),
                },
            )
            .await;

        info!(account_id = %account.id, sent = result.is_sent(), "Password setup resent");
        Ok(result)
    }

    async fn acquire_redemption(&self, token: &str) -> RedemptionPermit<'_> {
        let lock = {
            let mut locks = self
                .redemption_locks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            locks.entry(token.to_string()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        RedemptionPermit {
            guard: Some(guard),
            lock,
            token: token.to_string(),
            locks: &self.redemption_locks,
        }
    }

    /// Returns the provider account for the invitee, creating it if needed.
    async fn ensure_identity_account(
        &self,
        invitation: &Invitation,
    ) -> Result<(ExternalUserId, bool), InvitationError> {
        if let Some(existing) = self.identity.find_user_by_email(&invitation.email).await? {
            warn!(
                invitation_id = %invitation.id,
                external_id = %existing,
                "Identity provider account already exists; reusing it"
            );
            return Ok((existing, true));
        }

        match self
            .identity
            .create_user(&invitation.email, invitation.role)
            .await
        {
            Ok(created) => Ok((created, false)),
            Err(ProviderError::AlreadyExists) => {
                let existing = self
                    .identity
                    .find_user_by_email(&invitation.email)
                    .await?
                    .ok_or_else(|| {
                        ProviderError::InvalidResponse(
                            "user reported as existing but lookup found none".to_string(),
                        )
                    })?;
                Ok((existing, true))
            }
            Err(err) => {
                if err.is_ambiguous() {
                    warn!(
                        invitation_id = %invitation.id,
                        error = %err,
                        "Identity provider outcome unknown; invitation left active"
                    );
                } else {
                    error!(
                        invitation_id = %invitation.id,
                        error = %err,
                        "Identity provider account creation failed"
                    );
                }
                Err(err.into())
            }
        }
    }

    async fn dispatch_password_setup(
        &self,
        account: &Account,
        external_id: &str,
    ) -> NotificationResult {
        let ticket = match self
            .identity
            .create_password_change_ticket(
                external_id,
                &self.settings.password_setup_result_url,
                self.settings.password_ticket_ttl,
            )
            .await
        {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(account_id = %account.id, error = %err, "Failed to create password setup ticket");
                return NotificationResult::Failed(err.to_string());
            }
        };

        let result = self
            .notifier
            .send_password_setup(
                &account.email,
                PasswordSetupNotice {
                    reset_url: ticket.ticket_url,
                    user_name: account.name.clone(),
                },
            )
            .await;

        if let NotificationResult::Failed(reason) = &result {
            warn!(account_id = %account.id, error = %reason, "Failed to send password setup email");
        }
        result
    }
}
