//! Local user account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::validation::email_local_part;
use uuid::Uuid;

use super::invitation::InvitationRole;

/// A local user account, linked to its identity-provider record once
/// provisioning succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: InvitationRole,
    /// Identity-provider user id (e.g. `auth0|65f...`).
    pub external_id: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == InvitationRole::Admin
    }

    /// Name to greet the user with in notifications.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| email_local_part(&self.email))
    }
}

/// Data for the account created when an invitation is redeemed.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
    pub role: InvitationRole,
    pub external_id: Option<String>,
}

impl NewAccount {
    pub fn from_invitation(email: &str, role: InvitationRole, external_id: Option<String>) -> Self {
        Self {
            email: email.to_string(),
            name: derive_name_from_email(email),
            role,
            external_id,
        }
    }
}

/// Default display name for an invited account: the email's local part.
pub fn derive_name_from_email(email: &str) -> String {
    email_local_part(email).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: Option<&str>, role: InvitationRole) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            email: "jane.doe@example.com".to_string(),
            name: name.map(str::to_string),
            role,
            external_id: None,
            email_verified: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_derive_name_from_email() {
        assert_eq!(derive_name_from_email("jane.doe@example.com"), "jane.doe");
    }

    #[test]
    fn test_display_name_falls_back_to_local_part() {
        assert_eq!(account(None, InvitationRole::User).display_name(), "jane.doe");
        assert_eq!(
            account(Some("Jane"), InvitationRole::User).display_name(),
            "Jane"
        );
    }

    #[test]
    fn test_is_admin() {
        assert!(account(None, InvitationRole::Admin).is_admin());
        assert!(!account(None, InvitationRole::User).is_admin());
    }

    #[test]
    fn test_derived_name_is_local_part_of_any_address() {
        use fake::faker::internet::en::SafeEmail;
        use fake::Fake;

        for _ in 0..20 {
            let email: String = SafeEmail().fake();
            let name = derive_name_from_email(&email);
            assert!(!name.contains('@'));
            assert!(email.starts_with(&name));
        }
    }

    #[test]
    fn test_new_account_from_invitation() {
        let new = NewAccount::from_invitation(
            "new@example.com",
            InvitationRole::Admin,
            Some("auth0|1".to_string()),
        );
        assert_eq!(new.name, "new");
        assert_eq!(new.role, InvitationRole::Admin);
        assert_eq!(new.external_id.as_deref(), Some("auth0|1"));
    }
}
