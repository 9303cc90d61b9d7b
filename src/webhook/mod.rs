//! Identity-provider webhook: signature check, event decoding and dispatch
//! onto the user store.

pub mod dispatch;
pub mod event;
pub mod handler;
pub mod signature;

pub use dispatch::{DispatchOutcome, Dispatcher, build_profile, derive_username};
pub use event::{DeletedUser, EmailAddress, MalformedPayload, ProviderUser, WebhookEvent};
pub use signature::{VerificationError, WebhookHeaders, WebhookSecret, WebhookVerifier};

/// Path the identity provider delivers to.
pub const WEBHOOK_PATH: &str = "/api/clerk";
