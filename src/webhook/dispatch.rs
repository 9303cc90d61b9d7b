use super::event::{MalformedPayload, ProviderUser, WebhookEvent};
use crate::error::SyncError;
use crate::model::UserProfile;
use crate::store::UserStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal state of one dispatch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The store operation ran (including updates/deletes of unknown ids).
    Applied,
    /// Event type this service does not act on.
    Ignored,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Applied => "applied",
            DispatchOutcome::Ignored => "ignored",
        }
    }
}

/// Maps verified events onto user store operations. Holds no state between
/// calls.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn UserStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub async fn dispatch(&self, event: WebhookEvent) -> Result<DispatchOutcome, SyncError> {
        match event {
            WebhookEvent::UserCreated(user) => {
                let profile = build_profile(&user)?;
                info!(user_id = %user.id, email = %profile.email, "creating user");
                self.store.create(&user.id, profile).await?;
                Ok(DispatchOutcome::Applied)
            }
            WebhookEvent::UserUpdated(user) => {
                let profile = build_profile(&user)?;
                info!(user_id = %user.id, email = %profile.email, "updating user");
                if self.store.update(&user.id, profile).await?.is_none() {
                    warn!(user_id = %user.id, "update for unknown user, nothing to change");
                }
                Ok(DispatchOutcome::Applied)
            }
            WebhookEvent::UserDeleted(deleted) => {
                info!(user_id = %deleted.id, "deleting user");
                if !self.store.delete(&deleted.id).await? {
                    warn!(user_id = %deleted.id, "delete for unknown user, nothing to remove");
                }
                Ok(DispatchOutcome::Applied)
            }
            WebhookEvent::Unhandled(kind) => {
                debug!(event_type = %kind, "unhandled event type");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }
}

/// Display name: "first last", else the provider username, else the id.
pub fn derive_username(user: &ProviderUser) -> String {
    match (present(&user.first_name), present(&user.last_name)) {
        (Some(first), Some(last)) => format!("{first} {last}"),
        _ => present(&user.username)
            .map(str::to_string)
            .unwrap_or_else(|| user.id.clone()),
    }
}

/// Build the stored profile from a provider user object.
pub fn build_profile(user: &ProviderUser) -> Result<UserProfile, MalformedPayload> {
    let email = user
        .email_addresses
        .first()
        .map(|entry| entry.email_address.trim())
        .filter(|email| !email.is_empty())
        .ok_or_else(|| MalformedPayload::new(format!("user {} has no email address", user.id)))?;

    let image = present(&user.image_url)
        .ok_or_else(|| MalformedPayload::new(format!("user {} has no image url", user.id)))?;

    Ok(UserProfile {
        username: derive_username(user),
        email: email.to_string(),
        image: image.to_string(),
    })
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
