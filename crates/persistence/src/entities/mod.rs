//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod invitation;
pub mod role;
pub mod user;

pub use invitation::{InvitationEntity, InvitationWithInviterEntity};
pub use role::RoleColumn;
pub use user::UserEntity;
