//! Invitation domain models.
//!
//! An invitation grants one email address the one-time right to create an
//! account with a given role. Its lifecycle is
//! `ACTIVE -> {REDEEMED | EXPIRED | CANCELLED}`; cancellation deletes the row,
//! so only the first three states are ever observed on a loaded record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::validation::validate_email_address;
use uuid::Uuid;
use validator::Validate;

/// Role granted to the invitee on redemption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationRole {
    #[default]
    User,
    Admin,
}

impl InvitationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationRole::User => "user",
            InvitationRole::Admin => "admin",
        }
    }
}

impl std::fmt::Display for InvitationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InvitationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(InvitationRole::User),
            "admin" => Ok(InvitationRole::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Observable state of a stored invitation at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Active,
    Redeemed,
    Expired,
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvitationStatus::Active => write!(f, "active"),
            InvitationStatus::Redeemed => write!(f, "redeemed"),
            InvitationStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A stored invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Invitation {
    pub id: Uuid,
    pub email: String,
    pub role: InvitationRole,
    pub token: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    /// State of this invitation at `now`.
    ///
    /// Expiry takes precedence over `used`: once `expires_at` has passed the
    /// invitation reports `Expired` whether or not it was redeemed.
    pub fn status_at(&self, now: DateTime<Utc>) -> InvitationStatus {
        if now >= self.expires_at {
            InvitationStatus::Expired
        } else if self.used {
            InvitationStatus::Redeemed
        } else {
            InvitationStatus::Active
        }
    }

    /// Redeemable iff unused and `now < expires_at`.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == InvitationStatus::Active
    }
}

/// Data required to persist a new invitation.
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub email: String,
    pub role: InvitationRole,
    pub token: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Invitation joined with the inviting administrator's account details.
#[derive(Debug, Clone)]
pub struct InvitationWithInviter {
    pub invitation: Invitation,
    pub inviter_name: Option<String>,
    pub inviter_email: Option<String>,
}

/// Builds the redemption link sent to the invitee.
pub fn invite_url(app_base_url: &str, token: &str) -> String {
    format!("{}/invite?token={}", app_base_url.trim_end_matches('/'), token)
}

/// Request to create a new invitation.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateInvitationRequest {
    #[validate(custom(function = "validate_email_address"))]
    pub email: String,

    /// Role to grant on redemption (default: user)
    pub role: Option<InvitationRole>,
}

/// Response after creating an invitation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateInvitationResponse {
    pub id: Uuid,
    pub email: String,
    pub role: InvitationRole,
    pub expires_at: DateTime<Utc>,
    pub invite_url: String,
    pub notification_sent: bool,
    pub message: String,
}

/// Inviter info for invitation listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InviterInfo {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Summary of an invitation for the admin listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationSummary {
    pub id: Uuid,
    pub email: String,
    pub role: InvitationRole,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub invited_by: InviterInfo,
    pub invite_url: String,
}

/// Query parameters for listing invitations.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ListInvitationsQuery {
    #[validate(range(min = 1, max = 200, message = "limit must be between 1 and 200"))]
    pub limit: Option<i64>,

    #[validate(range(min = 0, message = "offset must not be negative"))]
    pub offset: Option<i64>,
}

/// Response for listing invitations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ListInvitationsResponse {
    pub data: Vec<InvitationSummary>,
}

/// Query for the public validation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyInvitationQuery {
    pub token: Option<String>,
}

/// Public validation result. Never carries identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyInvitationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<InvitationRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request to redeem an invitation.
#[derive(Debug, Clone, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

/// Redemption result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptInvitationResponse {
    pub success: bool,
    pub message: String,
}
