//! Error taxonomy for webhook processing.
//!
//! Every failure of a delivery is reported to the provider as a client error
//! (400) with a `{success: false, message}` body. The provider owns
//! redelivery, so nothing here is retried.

use crate::store::StoreError;
use crate::webhook::event::MalformedPayload;
use crate::webhook::signature::VerificationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse classification used for metrics labels and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Verification,
    MalformedPayload,
    DuplicateUser,
    Store,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Verification => "verification",
            ErrorCode::MalformedPayload => "malformed_payload",
            ErrorCode::DuplicateUser => "duplicate_user",
            ErrorCode::Store => "store",
        }
    }

    /// Store failures are the only ones that are not the sender's fault.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::Verification | ErrorCode::MalformedPayload => "client_error",
            ErrorCode::DuplicateUser => "conflict",
            ErrorCode::Store => "server_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    MalformedPayload(#[from] MalformedPayload),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Verification(_) => ErrorCode::Verification,
            SyncError::MalformedPayload(_) => ErrorCode::MalformedPayload,
            SyncError::Store(StoreError::Duplicate { .. }) => ErrorCode::DuplicateUser,
            SyncError::Store(_) => ErrorCode::Store,
        }
    }

    /// Status returned to the provider. Store failures stay client errors so
    /// the provider's delivery log shows the rejection.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// JSON body of every webhook response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
}

impl WebhookResponse {
    pub fn received() -> Self {
        Self {
            success: true,
            message: "Webhook Received".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(WebhookResponse::failed(self.to_string()))).into_response()
    }
}
