//! Domain services.
//!
//! The lifecycle controller owns invitation semantics; storage, the identity
//! provider, outbound notifications and time are injected behind traits.

pub mod clock;
pub mod identity_provider;
pub mod invitation_lifecycle;
pub mod invitation_store;
pub mod notification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity_provider::{
    CreateFailure, ExternalUserId, IdentityProvider, MockIdentityProvider, PasswordChangeTicket,
    ProviderError,
};
pub use invitation_lifecycle::{
    InvitationError, InvitationService, InvitationSettings, IssuedInvitation, RedeemedInvitation,
    TokenValidation,
};
pub use invitation_store::{
    InMemoryInvitationStore, InvitationStore, RedeemOutcome, StoreError, SupersedePolicy,
};
pub use notification::{
    InvitationNotice, MockNotificationDispatcher, NotificationDispatcher, NotificationResult,
    PasswordSetupNotice, SentNotification,
};
