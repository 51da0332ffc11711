//! Cryptographic utilities for invitation tokens and provisioning secrets.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Number of random bytes in an invitation token (256 bits).
pub const INVITATION_TOKEN_BYTES: usize = 32;

/// Length of the hex-encoded invitation token.
pub const INVITATION_TOKEN_LEN: usize = INVITATION_TOKEN_BYTES * 2;

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a single-use invitation token.
///
/// 32 bytes from the operating system CSPRNG, rendered as 64 lowercase hex
/// characters so the token can be placed in a URL without encoding.
pub fn generate_invitation_token() -> String {
    let mut bytes = [0u8; INVITATION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns true if `token` has the exact shape produced by
/// [`generate_invitation_token`].
pub fn is_invitation_token_shape(token: &str) -> bool {
    token.len() == INVITATION_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Short, non-reversible identifier for a token, safe to put in logs.
pub fn token_fingerprint(token: &str) -> String {
    sha256_hex(token)[..12].to_string()
}

/// Generates a throwaway password for accounts created in the identity
/// provider. The invitee replaces it through the password-setup ticket.
///
/// The suffix satisfies the usual "upper, lower, digit, symbol" policy.
pub fn generate_placeholder_password() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    format!("{}Aa1!", URL_SAFE_NO_PAD.encode(bytes))
}
