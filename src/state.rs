use crate::config::ServerConfig;
use crate::health::HealthChecker;
use crate::store::UserStore;
use crate::webhook::{Dispatcher, WebhookVerifier};
use axum::extract::FromRef;
use std::sync::Arc;

/// Shared handles for every request handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub verifier: Arc<WebhookVerifier>,
    pub dispatcher: Dispatcher,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>, store: Arc<dyn UserStore>) -> Self {
        let verifier = Arc::new(WebhookVerifier::new(
            config.webhook_secret.clone(),
            config.signature_tolerance_secs,
        ));
        let health = Arc::new(HealthChecker::new(config.clone(), store.clone()));
        Self {
            config,
            verifier,
            dispatcher: Dispatcher::new(store),
            health,
        }
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        self.dispatcher.store()
    }
}

impl FromRef<AppState> for Arc<HealthChecker> {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}
