//! Typed view of a verified webhook payload.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// The verified payload is missing something the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed payload: {0}")]
pub struct MalformedPayload(pub String);

impl MalformedPayload {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// One address entry of the provider's user object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub id: Option<String>,
    pub email_address: String,
}

/// The provider's user object as delivered in `user.created` / `user.updated`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// The tombstone delivered with `user.deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeletedUser {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    UserCreated(ProviderUser),
    UserUpdated(ProviderUser),
    UserDeleted(DeletedUser),
    /// Any other event type; acknowledged and otherwise ignored.
    Unhandled(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub const USER_CREATED: &str = "user.created";
pub const USER_UPDATED: &str = "user.updated";
pub const USER_DELETED: &str = "user.deleted";

impl WebhookEvent {
    /// Interpret a verified JSON payload.
    pub fn from_value(payload: Value) -> Result<Self, MalformedPayload> {
        let Envelope { kind, data } = serde_json::from_value(payload)
            .map_err(|e| MalformedPayload::new(format!("invalid event envelope: {e}")))?;

        match kind.as_str() {
            USER_CREATED => Ok(WebhookEvent::UserCreated(user_data(&kind, data)?)),
            USER_UPDATED => Ok(WebhookEvent::UserUpdated(user_data(&kind, data)?)),
            USER_DELETED => {
                let deleted: DeletedUser = decode_data(&kind, data)?;
                require_id(&deleted.id)?;
                Ok(WebhookEvent::UserDeleted(deleted))
            }
            _ => Ok(WebhookEvent::Unhandled(kind)),
        }
    }

    /// The wire name of the event type.
    pub fn kind(&self) -> &str {
        match self {
            WebhookEvent::UserCreated(_) => USER_CREATED,
            WebhookEvent::UserUpdated(_) => USER_UPDATED,
            WebhookEvent::UserDeleted(_) => USER_DELETED,
            WebhookEvent::Unhandled(kind) => kind,
        }
    }

    /// Id of the affected user, if the event concerns one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            WebhookEvent::UserCreated(user) | WebhookEvent::UserUpdated(user) => Some(&user.id),
            WebhookEvent::UserDeleted(deleted) => Some(&deleted.id),
            WebhookEvent::Unhandled(_) => None,
        }
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_id() {
            Some(id) => write!(f, "{} ({id})", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

fn user_data(kind: &str, data: Value) -> Result<ProviderUser, MalformedPayload> {
    let user: ProviderUser = decode_data(kind, data)?;
    require_id(&user.id)?;
    Ok(user)
}

fn decode_data<T: serde::de::DeserializeOwned>(
    kind: &str,
    data: Value,
) -> Result<T, MalformedPayload> {
    serde_json::from_value(data)
        .map_err(|e| MalformedPayload::new(format!("invalid {kind} data: {e}")))
}

fn require_id(id: &str) -> Result<(), MalformedPayload> {
    if id.trim().is_empty() {
        return Err(MalformedPayload::new("user id is empty"));
    }
    Ok(())
}
