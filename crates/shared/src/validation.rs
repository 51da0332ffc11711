//! Common validation utilities.

use validator::{ValidateEmail, ValidationError};

/// Maximum email length accepted for invitations (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Normalizes an email address for storage and comparison.
///
/// Addresses are trimmed and lowercased so that `New@Example.com ` and
/// `new@example.com` refer to the same invitee.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates that an email address is well formed and within length limits.
pub fn validate_email_address(email: &str) -> Result<(), ValidationError> {
    let normalized = normalize_email(email);
    if normalized.len() > MAX_EMAIL_LENGTH {
        let mut err = ValidationError::new("email_length");
        err.message = Some("Email address is too long".into());
        return Err(err);
    }
    if !normalized.validate_email() {
        let mut err = ValidationError::new("email_format");
        err.message = Some("Invalid email address".into());
        return Err(err);
    }
    Ok(())
}

/// Returns the local part of an email address (before the last `@`).
pub fn email_local_part(email: &str) -> &str {
    email.rsplit_once('@').map(|(local, _)| local).unwrap_or(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  New@Example.COM "), "new@example.com");
        assert_eq!(normalize_email("a@b.c"), "a@b.c");
    }

    #[test]
    fn test_validate_email_address_valid() {
        assert!(validate_email_address("new@example.com").is_ok());
        assert!(validate_email_address(" Mixed.Case@Example.com ").is_ok());
    }

    #[test]
    fn test_validate_email_address_invalid() {
        assert!(validate_email_address("").is_err());
        assert!(validate_email_address("not-an-email").is_err());
        assert!(validate_email_address("missing@").is_err());
    }

    #[test]
    fn test_validate_email_address_too_long() {
        let email = format!("{}@example.com", "a".repeat(250));
        let err = validate_email_address(&email).unwrap_err();
        assert_eq!(err.code, "email_length");
    }

    #[test]
    fn test_email_local_part() {
        assert_eq!(email_local_part("jane.doe@example.com"), "jane.doe");
        assert_eq!(email_local_part("weird@name@example.com"), "weird@name");
        assert_eq!(email_local_part("no-at-sign"), "no-at-sign");
    }
}
