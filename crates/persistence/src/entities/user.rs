//! User account entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::Account;
use sqlx::FromRow;

use super::RoleColumn;
use uuid::Uuid;

/// Database row mapping for the users table.
#[derive(Debug, Clone, FromRow)]
pub struct UserEntity {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: RoleColumn,
    pub external_id: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserEntity> for Account {
    fn from(entity: UserEntity) -> Self {
        Self {
            id: entity.id,
            email: entity.email,
            name: entity.name,
            role: entity.role.into(),
            external_id: entity.external_id,
            email_verified: entity.email_verified,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
