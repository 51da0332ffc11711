//! Admin user-account endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use domain::services::NotificationResult;
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AdminAuth;

#[derive(Debug, Serialize)]
pub struct PasswordSetupResponse {
    pub success: bool,
    pub message: String,
}

/// Send a fresh password-setup link to an existing account.
///
/// POST /api/v1/admin/users/:user_id/password-setup
///
/// Used when the invitee lost or let expire the email sent at redemption.
pub async fn resend_password_setup(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PasswordSetupResponse>, ApiError> {
    let result = state.invitations.resend_password_setup(user_id).await?;

    tracing::info!(
        user_id = %user_id,
        admin_id = %admin.account.id,
        "Password setup requested by admin"
    );

    let success = result.is_sent();
    let message = match result {
        NotificationResult::Sent => "Password setup email sent".to_string(),
        NotificationResult::Skipped => {
            "Password setup link created, but email delivery is disabled".to_string()
        }
        NotificationResult::Failed(reason) => {
            tracing::warn!(user_id = %user_id, error = %reason, "Password setup email failed");
            "Password setup email could not be sent".to_string()
        }
    };

    Ok(Json(PasswordSetupResponse {
        success,
        message,
    }))
}
