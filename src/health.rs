use crate::config::ServerConfig;
use crate::store::UserStore;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Secrets shorter than this still verify, but are reported as degraded.
const MIN_SECRET_BYTES: usize = 16;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving traffic with a known weakness
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two statuses.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn with_status(
        component: impl Into<String>,
        status: HealthStatus,
        error: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            error,
            timestamp: now(),
            details,
        }
    }

    pub fn healthy(component: impl Into<String>, details: serde_json::Value) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None, Some(details))
    }

    pub fn degraded(
        component: impl Into<String>,
        error: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::with_status(
            component,
            HealthStatus::Degraded,
            Some(error.into()),
            Some(details),
        )
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Unhealthy, Some(error.into()), None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Components reporting unhealthy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: HashMap<String, ComponentHealth>,
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

/// Runs liveness, readiness and per-component checks against the user store
/// and the webhook configuration.
#[derive(Clone)]
pub struct HealthChecker {
    config: Arc<ServerConfig>,
    store: Arc<dyn UserStore>,
}

impl HealthChecker {
    pub fn new(config: Arc<ServerConfig>, store: Arc<dyn UserStore>) -> Self {
        Self { config, store }
    }

    /// Healthy whenever the process can answer.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components().await;
        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();

        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }
        not_ready.sort();

        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: now(),
            not_ready,
        }
    }

    pub async fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all_components().await;
        let status = components
            .values()
            .fold(HealthStatus::Healthy, |acc, health| acc.combine(health.status));

        ComponentHealthResponse {
            status,
            timestamp: now(),
            components,
        }
    }

    async fn check_all_components(&self) -> HashMap<String, ComponentHealth> {
        let mut components = HashMap::new();
        components.insert("user_store".to_string(), self.check_user_store().await);
        components.insert("webhook".to_string(), self.check_webhook_config());
        components
    }

    async fn check_user_store(&self) -> ComponentHealth {
        match self.store.count().await {
            Ok(users) => ComponentHealth::healthy(
                "user_store",
                serde_json::json!({
                    "backend": self.store.backend(),
                    "location": self.config.store_location.to_string(),
                    "users": users,
                }),
            ),
            Err(e) => ComponentHealth::unhealthy(
                "user_store",
                format!("{} store is not readable: {}", self.store.backend(), e),
            ),
        }
    }

    fn check_webhook_config(&self) -> ComponentHealth {
        let secret_bytes = self.config.webhook_secret.len();
        let details = serde_json::json!({
            "secret_bytes": secret_bytes,
            "tolerance_secs": self.config.signature_tolerance_secs,
            "max_body_bytes": self.config.max_webhook_body_bytes,
        });

        if secret_bytes < MIN_SECRET_BYTES {
            ComponentHealth::degraded(
                "webhook",
                format!("webhook secret is only {secret_bytes} bytes"),
                details,
            )
        } else {
            ComponentHealth::healthy("webhook", details)
        }
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness().await
}

pub async fn components_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.components().await
}
