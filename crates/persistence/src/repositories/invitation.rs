//! Invitation repository.
//!
//! Implements [`InvitationStore`] on Postgres. The one-unused-invitation-per-
//! email rule is enforced twice: an advisory lock on the email serializes
//! writers inside the create transaction, and the partial unique index
//! `idx_invitations_email_unused` rejects anything that slips past it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::invitation::InvitationWithInviter;
use domain::models::{Account, Invitation, NewAccount, NewInvitation};
use domain::services::{InvitationStore, RedeemOutcome, StoreError, SupersedePolicy};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{InvitationEntity, InvitationWithInviterEntity, UserEntity};
use crate::metrics::QueryTimer;
use crate::repositories::UserRepository;

const INVITATION_COLUMNS: &str =
    "id, email, role, token, invited_by, expires_at, used, used_at, created_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn database_error(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Maps errors from invitation writes; a unique violation means another
/// unused invitation for the email (or the same token) won the race.
fn write_error(err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict
    } else {
        database_error(err)
    }
}

/// Repository for invitation operations.
#[derive(Clone)]
pub struct InvitationRepository {
    pool: PgPool,
    users: UserRepository,
}

impl InvitationRepository {
    /// Creates a new invitation repository.
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl InvitationStore for InvitationRepository {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.users
            .find_by_email(email)
            .await
            .map(|u| u.map(Into::into))
            .map_err(database_error)
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        self.users
            .find_by_id(id)
            .await
            .map(|u| u.map(Into::into))
            .map_err(database_error)
    }

    async fn find_active_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("find_active_invitation_by_email");
        let result = sqlx::query_as::<_, InvitationEntity>(&format!(
            r#"
            SELECT {}
            FROM invitations
            WHERE email = $1 AND used = false AND expires_at > $2
            "#,
            INVITATION_COLUMNS
        ))
        .bind(email)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result.map(|e| e.map(Into::into)).map_err(database_error)
    }

    async fn create(
        &self,
        invitation: NewInvitation,
        policy: SupersedePolicy,
    ) -> Result<Invitation, StoreError> {
        let timer = QueryTimer::new("create_invitation");
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        // Serializes concurrent issuers for the same email until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&invitation.email)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        if policy == SupersedePolicy::Reject {
            let active: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM invitations
                WHERE email = $1 AND used = false AND expires_at > $2
                "#,
            )
            .bind(&invitation.email)
            .bind(invitation.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(database_error)?;

            if active.is_some() {
                return Err(StoreError::Conflict);
            }
        }

        let superseded = sqlx::query("DELETE FROM invitations WHERE email = $1 AND used = false")
            .bind(&invitation.email)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?
            .rows_affected();

        let created = sqlx::query_as::<_, InvitationEntity>(&format!(
            r#"
            INSERT INTO invitations (email, role, token, invited_by, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        ))
        .bind(&invitation.email)
        .bind(invitation.role.as_str())
        .bind(&invitation.token)
        .bind(invitation.invited_by)
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(write_error)?;

        tx.commit().await.map_err(write_error)?;
        timer.record();

        if superseded > 0 {
            tracing::debug!(
                email = %invitation.email,
                superseded,
                "Removed unused invitations for email"
            );
        }

        Ok(created.into())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("find_invitation_by_token");
        let result = sqlx::query_as::<_, InvitationEntity>(&format!(
            "SELECT {} FROM invitations WHERE token = $1",
            INVITATION_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result.map(|e| e.map(Into::into)).map_err(database_error)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        let timer = QueryTimer::new("find_invitation_by_id");
        let result = sqlx::query_as::<_, InvitationEntity>(&format!(
            "SELECT {} FROM invitations WHERE id = $1",
            INVITATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result.map(|e| e.map(Into::into)).map_err(database_error)
    }

    async fn redeem(
        &self,
        invitation_id: Uuid,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, StoreError> {
        let timer = QueryTimer::new("redeem_invitation");
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        // Conditional update: only one transaction can flip `used`.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE invitations
            SET used = true, used_at = $2
            WHERE id = $1 AND used = false AND expires_at > $2
            RETURNING id
            "#,
        )
        .bind(invitation_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;

        if claimed.is_none() {
            let current: Option<(bool,)> =
                sqlx::query_as("SELECT used FROM invitations WHERE id = $1")
                    .bind(invitation_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(database_error)?;
            tx.rollback().await.map_err(database_error)?;
            timer.record();

            return Ok(match current {
                None => RedeemOutcome::Missing,
                Some((true,)) => RedeemOutcome::AlreadyUsed,
                Some((false,)) => RedeemOutcome::Expired,
            });
        }

        let inserted = sqlx::query_as::<_, UserEntity>(
            r#"
            INSERT INTO users (email, name, role, external_id, email_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, true, $5, $5)
            RETURNING id, email, name, role, external_id, email_verified, created_at, updated_at
            "#,
        )
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.role.as_str())
        .bind(&account.external_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let user = match inserted {
            Ok(user) => user,
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await.map_err(database_error)?;
                timer.record();
                return Err(StoreError::DuplicateAccount);
            }
            Err(err) => return Err(database_error(err)),
        };

        tx.commit().await.map_err(database_error)?;
        timer.record();

        Ok(RedeemOutcome::Redeemed(user.into()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let timer = QueryTimer::new("delete_invitation");
        let result = sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await;
        timer.record();
        Ok(result.map_err(database_error)?.rows_affected() > 0)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<InvitationWithInviter>, StoreError> {
        let timer = QueryTimer::new("list_invitations");
        let result = sqlx::query_as::<_, InvitationWithInviterEntity>(
            r#"
            SELECT i.id, i.email, i.role, i.token, i.invited_by, i.expires_at, i.used,
                   i.used_at, i.created_at,
                   u.name AS inviter_name, u.email AS inviter_email
            FROM invitations i
            LEFT JOIN users u ON u.id = i.invited_by
            ORDER BY i.created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
            .map(|rows| rows.into_iter().map(Into::into).collect())
            .map_err(database_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_conflicts() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(matches!(
            write_error(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
    }
}
