//! Invitation endpoints.
//!
//! Admin endpoints issue, list and cancel invitations. The public endpoints
//! verify and accept a token; they answer with the `{valid, ...}` and
//! `{success, message}` contracts the invite page consumes, not with
//! `ApiError` bodies.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::invitation::{
    AcceptInvitationRequest, AcceptInvitationResponse, CreateInvitationRequest,
    CreateInvitationResponse, ListInvitationsQuery, ListInvitationsResponse,
    VerifyInvitationQuery, VerifyInvitationResponse,
};
use domain::services::{InvitationError, NotificationResult};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AdminAuth;
use crate::middleware::metrics::{
    record_invitation_issued, record_invitation_redeemed, record_invitation_verified,
};

const DEFAULT_LIST_LIMIT: i64 = 50;

pub const TOKEN_REQUIRED_MESSAGE: &str = "Token is required";
pub const ACCEPTED_MESSAGE: &str =
    "Invitation accepted successfully. Please check your email to set your password.";
pub const ACCEPT_FAILED_MESSAGE: &str = "An error occurred while accepting the invitation.";
pub const VERIFY_FAILED_MESSAGE: &str = "An error occurred while verifying the invitation.";
pub const PROVIDER_FAILED_MESSAGE: &str =
    "Account could not be created right now. Please try again in a few minutes.";

/// Create an invitation.
///
/// POST /api/v1/admin/invitations
pub async fn create_invitation(
    State(state): State<AppState>,
    admin: AdminAuth,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<CreateInvitationResponse>), ApiError> {
    request.validate()?;
    let role = request.role.unwrap_or_default();

    let issued = state
        .invitations
        .issue(&request.email, role, admin.account.id)
        .await?;

    record_invitation_issued(issued.notification.is_sent());

    let message = match &issued.notification {
        NotificationResult::Sent => format!("Invitation sent to {}", issued.invitation.email),
        NotificationResult::Skipped => {
            "Invitation created. Email delivery is disabled; share the invite link directly."
                .to_string()
        }
        NotificationResult::Failed(_) => {
            "Invitation created, but the email could not be sent. Share the invite link directly."
                .to_string()
        }
    };

    let invitation = issued.invitation;
    Ok((
        StatusCode::CREATED,
        Json(CreateInvitationResponse {
            id: invitation.id,
            email: invitation.email,
            role: invitation.role,
            expires_at: invitation.expires_at,
            invite_url: issued.invite_url,
            notification_sent: issued.notification.is_sent(),
            message,
        }),
    ))
}

/// List invitations, newest first.
///
/// GET /api/v1/admin/invitations
pub async fn list_invitations(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Query(query): Query<ListInvitationsQuery>,
) -> Result<Json<ListInvitationsResponse>, ApiError> {
    query.validate()?;

    let data = state
        .invitations
        .list(
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(ListInvitationsResponse { data }))
}

/// Cancel an invitation. Succeeds whether or not it still existed.
///
/// DELETE /api/v1/admin/invitations/:invitation_id
pub async fn delete_invitation(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.invitations.cancel(invitation_id).await?;
    if !removed {
        tracing::debug!(
            invitation_id = %invitation_id,
            admin_id = %admin.account.id,
            "Cancel requested for missing invitation"
        );
    }
    Ok(Json(json!({ "success": true })))
}

/// Check whether a token can be redeemed.
///
/// GET /api/v1/invitations/verify?token=
pub async fn verify_invitation(
    State(state): State<AppState>,
    Query(query): Query<VerifyInvitationQuery>,
) -> (StatusCode, Json<VerifyInvitationResponse>) {
    let Some(token) = query.token.filter(|t| !t.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(verify_failure(TOKEN_REQUIRED_MESSAGE)));
    };

    match state.invitations.validate(token.trim()).await {
        Ok(validation) => {
            record_invitation_verified(validation.outcome());
            let status = if validation.is_valid() {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(validation.into()))
        }
        Err(e) => {
            error!(error = %e, "Invitation verification failed");
            record_invitation_verified("error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(verify_failure(VERIFY_FAILED_MESSAGE)),
            )
        }
    }
}

/// Redeem a token: create the identity-provider and local accounts.
///
/// POST /api/v1/invitations/accept
pub async fn accept_invitation(
    State(state): State<AppState>,
    payload: Result<Json<AcceptInvitationRequest>, JsonRejection>,
) -> (StatusCode, Json<AcceptInvitationResponse>) {
    let token = match payload {
        Ok(Json(request)) if !request.token.trim().is_empty() => request.token,
        _ => return accept_failure(StatusCode::BAD_REQUEST, TOKEN_REQUIRED_MESSAGE),
    };

    match state.invitations.redeem(token.trim()).await {
        Ok(redeemed) => {
            record_invitation_redeemed("success");
            if !redeemed.password_setup.is_sent() {
                warn!(
                    account_id = %redeemed.account.id,
                    "Password setup email not delivered after redemption"
                );
            }
            (
                StatusCode::OK,
                Json(AcceptInvitationResponse {
                    success: true,
                    message: ACCEPTED_MESSAGE.to_string(),
                }),
            )
        }
        Err(err) => {
            let (status, outcome, message) = accept_error(&err);
            record_invitation_redeemed(outcome);
            if status.is_server_error() {
                error!(error = %err, "Invitation redemption failed");
            }
            accept_failure(status, &message)
        }
    }
}

/// Maps a redemption error to status, metric outcome and user-facing message.
fn accept_error(err: &InvitationError) -> (StatusCode, &'static str, String) {
    match err {
        InvitationError::InvalidToken => (StatusCode::BAD_REQUEST, "invalid", err.to_string()),
        InvitationError::AlreadyUsed => (StatusCode::BAD_REQUEST, "already_used", err.to_string()),
        InvitationError::Expired => (StatusCode::BAD_REQUEST, "expired", err.to_string()),
        InvitationError::DuplicateAccount => {
            (StatusCode::CONFLICT, "duplicate_account", err.to_string())
        }
        InvitationError::Provider(_) => (
            StatusCode::BAD_GATEWAY,
            "provider_error",
            PROVIDER_FAILED_MESSAGE.to_string(),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "error",
            ACCEPT_FAILED_MESSAGE.to_string(),
        ),
    }
}

fn accept_failure(status: StatusCode, message: &str) -> (StatusCode, Json<AcceptInvitationResponse>) {
    (
        status,
        Json(AcceptInvitationResponse {
            success: false,
            message: message.to_string(),
        }),
    )
}

fn verify_failure(message: &str) -> VerifyInvitationResponse {
    VerifyInvitationResponse {
        valid: false,
        email: None,
        role: None,
        message: Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::services::ProviderError;

    #[test]
    fn test_accept_error_mapping() {
        let cases = [
            (InvitationError::InvalidToken, StatusCode::BAD_REQUEST, "Invalid invitation token"),
            (InvitationError::AlreadyUsed, StatusCode::BAD_REQUEST, "Invitation already used"),
            (InvitationError::Expired, StatusCode::BAD_REQUEST, "Invitation has expired"),
            (
                InvitationError::Provider(ProviderError::Timeout),
                StatusCode::BAD_GATEWAY,
                PROVIDER_FAILED_MESSAGE,
            ),
            (
                InvitationError::Persistence("deadlock".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                ACCEPT_FAILED_MESSAGE,
            ),
        ];

        for (err, status, message) in cases {
            let (got_status, _, got_message) = accept_error(&err);
            assert_eq!(got_status, status);
            assert_eq!(got_message, message);
        }

        let (status, outcome, _) = accept_error(&InvitationError::DuplicateAccount);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(outcome, "duplicate_account");
    }

    #[test]
    fn test_failure_bodies() {
        let (status, Json(body)) = accept_failure(StatusCode::BAD_REQUEST, TOKEN_REQUIRED_MESSAGE);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert_eq!(body.message, "Token is required");

        let body = serde_json::to_value(verify_failure(TOKEN_REQUIRED_MESSAGE)).unwrap();
        assert_eq!(body, json!({ "valid": false, "message": "Token is required" }));
    }
}
