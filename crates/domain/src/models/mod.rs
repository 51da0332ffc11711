//! Domain models.

pub mod account;
pub mod invitation;

pub use account::{Account, NewAccount};
pub use invitation::{Invitation, InvitationRole, InvitationStatus, NewInvitation};
