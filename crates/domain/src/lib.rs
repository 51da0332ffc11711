//! Domain layer for the invitation provisioning service.
//!
//! This crate contains:
//! - Domain models (Invitation, Account)
//! - The invitation lifecycle controller and its collaborator traits
//! - In-memory fakes of every collaborator, used by tests across the workspace

pub mod models;
pub mod services;
