//! Invitation entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::invitation::InvitationWithInviter;
use domain::models::Invitation;
use sqlx::FromRow;

use super::RoleColumn;
use uuid::Uuid;

/// Database row mapping for the invitations table.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationEntity {
    pub id: Uuid,
    pub email: String,
    pub role: RoleColumn,
    pub token: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<InvitationEntity> for Invitation {
    fn from(entity: InvitationEntity) -> Self {
        Self {
            id: entity.id,
            email: entity.email,
            role: entity.role.into(),
            token: entity.token,
            invited_by: entity.invited_by,
            expires_at: entity.expires_at,
            used: entity.used,
            used_at: entity.used_at,
            created_at: entity.created_at,
        }
    }
}

/// Invitation row joined with the inviter's account.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationWithInviterEntity {
    #[sqlx(flatten)]
    pub invitation: InvitationEntity,
    pub inviter_name: Option<String>,
    pub inviter_email: Option<String>,
}

impl From<InvitationWithInviterEntity> for InvitationWithInviter {
    fn from(entity: InvitationWithInviterEntity) -> Self {
        Self {
            invitation: entity.invitation.into(),
            inviter_name: entity.inviter_name,
            inviter_email: entity.inviter_email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::InvitationRole;
    use fake::faker::internet::en::SafeEmail;
    use fake::Fake;

    fn entity(role: InvitationRole) -> InvitationEntity {
        let now = Utc::now();
        InvitationEntity {
            id: Uuid::new_v4(),
            email: SafeEmail().fake(),
            role: RoleColumn(role),
            token: "a".repeat(64),
            invited_by: Uuid::new_v4(),
            expires_at: now,
            used: false,
            used_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_entity_to_domain() {
        let e = entity(InvitationRole::Admin);
        let id = e.id;
        let invitation: Invitation = e.into();
        assert_eq!(invitation.id, id);
        assert_eq!(invitation.role, InvitationRole::Admin);
    }

    #[test]
    fn test_with_inviter_to_domain() {
        let row = InvitationWithInviterEntity {
            invitation: entity(InvitationRole::User),
            inviter_name: Some("Admin".to_string()),
            inviter_email: Some("admin@example.com".to_string()),
        };
        let listed: InvitationWithInviter = row.into();
        assert_eq!(listed.invitation.role, InvitationRole::User);
        assert_eq!(listed.inviter_name.as_deref(), Some("Admin"));
    }
}
