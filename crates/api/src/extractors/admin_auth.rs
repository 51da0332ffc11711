//! Administrator bearer-token extractor.
//!
//! The token proves who the caller is; whether they are an administrator is
//! decided by the account's current role in the user store, so demoting an
//! account takes effect before its tokens expire.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use domain::models::Account;
use shared::jwt::{extract_account_id, JwtError};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub account: Account,
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header format".to_string()))
}

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let claims = state.jwt.validate_token(token).map_err(|e| match e {
            JwtError::TokenExpired => ApiError::Unauthorized("Token has expired".to_string()),
            _ => ApiError::Unauthorized("Invalid or expired token".to_string()),
        })?;

        let account_id = extract_account_id(&claims)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

        let account: Account = state
            .users
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Unknown account".to_string()))?
            .into();

        if !account.is_admin() {
            tracing::warn!(account_id = %account.id, "Non-admin attempted admin operation");
            return Err(ApiError::Forbidden(
                "Administrator role required".to_string(),
            ));
        }

        Ok(AdminAuth { account })
    }
}
