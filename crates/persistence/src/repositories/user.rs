//! User repository for database operations.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::UserEntity;
use crate::metrics::QueryTimer;

const USER_COLUMNS: &str =
    "id, email, name, role, external_id, email_verified, created_at, updated_at";

/// Repository for local user accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Creates a new UserRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a user by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_user_by_id");
        let result = sqlx::query_as::<_, UserEntity>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a user by email address (case-insensitive).
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_user_by_email");
        let result = sqlx::query_as::<_, UserEntity>(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Insert a user directly, outside the invitation flow.
    ///
    /// Used by the startup admin bootstrap.
    pub async fn create(
        &self,
        email: &str,
        name: Option<&str>,
        role: &str,
        external_id: Option<&str>,
    ) -> Result<UserEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_user");
        let result = sqlx::query_as::<_, UserEntity>(&format!(
            r#"
            INSERT INTO users (email, name, role, external_id, email_verified)
            VALUES ($1, $2, $3, $4, true)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(email)
        .bind(name)
        .bind(role)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Grant the admin role to the account with this email, if any.
    pub async fn promote_to_admin(&self, email: &str) -> Result<Option<UserEntity>, sqlx::Error> {
        let timer = QueryTimer::new("promote_user_to_admin");
        let result = sqlx::query_as::<_, UserEntity>(&format!(
            r#"
            UPDATE users
            SET role = 'admin', updated_at = NOW()
            WHERE lower(email) = lower($1)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }
}
