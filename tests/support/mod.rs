#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use hotel_booking_api::{
    AppState, ServerConfig, build_router,
    model::{UserProfile, UserRecord},
    store::{MemoryUserStore, StoreError, StoreLocation, UserStore},
    webhook::{WEBHOOK_PATH, WebhookSecret, WebhookVerifier},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

pub const SIGNING_KEY: &[u8] = b"test-signing-key";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryUserStore>,
    pub signer: WebhookVerifier,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryUserStore::new());
        Self::with_store(config, store)
    }

    pub fn with_store(config: ServerConfig, store: Arc<MemoryUserStore>) -> Self {
        let signer = WebhookVerifier::new(config.webhook_secret.clone(), 300);
        let state = AppState::new(Arc::new(config), store.clone() as Arc<dyn UserStore>);
        Self {
            router: build_router(state),
            store,
            signer,
        }
    }

    /// Deliver `body` exactly as given, signed with the test key.
    pub async fn deliver_raw(&self, msg_id: &str, body: &str) -> Response<Body> {
        self.send(signed_request(&self.signer, msg_id, body)).await
    }

    pub async fn deliver(&self, msg_id: &str, event: &Value) -> Response<Body> {
        self.deliver_raw(msg_id, &event.to_string()).await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }
}

/// Router over an arbitrary store, plus a signer for the test key.
pub fn router_with_store(store: Arc<dyn UserStore>) -> (Router, WebhookVerifier) {
    let config = test_config();
    let signer = WebhookVerifier::new(config.webhook_secret.clone(), 300);
    (build_router(AppState::new(Arc::new(config), store)), signer)
}

pub fn signed_request(signer: &WebhookVerifier, msg_id: &str, body: &str) -> Request<Body> {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = signer
        .sign(msg_id, timestamp, body.as_bytes())
        .expect("sign test body");
    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .header("svix-id", msg_id)
        .header("svix-timestamp", timestamp.to_string())
        .header("svix-signature", signature)
        .body(Body::from(body.to_string()))
        .expect("build request")
}

/// Store whose backend is unreachable: every operation fails.
pub struct UnavailableStore;

#[async_trait]
impl UserStore for UnavailableStore {
    fn backend(&self) -> &'static str {
        "unavailable"
    }

    async fn create(&self, _id: &str, _profile: UserProfile) -> Result<UserRecord, StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn update(
        &self,
        _id: &str,
        _profile: UserProfile,
    ) -> Result<Option<UserRecord>, StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn delete(&self, _id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn get(&self, _id: &str) -> Result<Option<UserRecord>, StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig::new(
        WebhookSecret::from_bytes(SIGNING_KEY.to_vec()),
        StoreLocation::Memory,
    )
}

pub async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn read_text(response: Response<Body>) -> (StatusCode, String) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

pub fn user_data(id: &str) -> Value {
    json!({
        "id": id,
        "first_name": "Ada",
        "last_name": "Lovelace",
        "username": "ada",
        "email_addresses": [
            { "id": "idn_1", "email_address": format!("{id}@example.com") }
        ],
        "image_url": format!("https://img.example.com/{id}.png"),
    })
}

pub fn event(kind: &str, data: Value) -> Value {
    json!({ "type": kind, "object": "event", "data": data })
}
