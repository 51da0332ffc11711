//! HTTP route handlers.

pub mod admin_users;
pub mod health;
pub mod invitations;
