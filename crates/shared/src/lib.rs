//! Shared utilities and common types for the invitation provisioning backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Cryptographic utilities (invitation tokens, placeholder secrets)
//! - JWT validation for administrator bearer tokens
//! - Common validation logic

pub mod crypto;
pub mod jwt;
pub mod validation;
