//! Adapters for external systems (email delivery, the identity provider) and
//! the startup admin bootstrap.

pub mod admin_bootstrap;
pub mod email;
pub mod identity_provider;
pub mod token_cache;

pub use admin_bootstrap::{bootstrap_admin, BootstrapError, BootstrappedAdmin};
pub use email::{EmailService, NotificationError};
pub use identity_provider::Auth0Client;
pub use token_cache::{ManagementTokenCache, TokenSource};
