pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod webhook;

pub use config::{CliArgs, ServerConfig};
pub use error::{ErrorCode, SyncError, WebhookResponse};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
pub use state::AppState;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
};
use shutdown::StoreShutdownHandler;
use std::{future::IntoFuture, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use webhook::WEBHOOK_PATH;

/// Route table: the webhook endpoint carries its own body limit and takes the
/// body as raw bytes; everything else is plain GET.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_webhook_body_bytes;

    Router::new()
        .route("/", get(root_handler))
        .route(
            WEBHOOK_PATH,
            post(webhook::handler::receive).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .route("/health/components", get(health::components_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> &'static str {
    "API is working"
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> (StatusCode, String) {
    (StatusCode::OK, metrics::METRICS.encode())
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);

    let store = store::open(&config.store_location)
        .with_context(|| format!("failed to open user store at {}", config.store_location))?;
    let users = store
        .count()
        .await
        .context("user store is not readable")?;
    tracing::info!(
        backend = store.backend(),
        location = %config.store_location,
        users,
        "user store opened"
    );

    let coordinator = Arc::new(ShutdownCoordinator::new(config.shutdown_config()));
    coordinator
        .add_handler(Box::new(StoreShutdownHandler::new(store.clone())))
        .await;

    let state = AppState::new(config.clone(), store);
    let router = build_router(state);

    let listener = TcpListener::bind(config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(bind = %actual_addr, path = WEBHOOK_PATH, "listening");

    tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.wait_for_signal().await }
    });

    let token = coordinator.token();
    let server_future = axum::serve(listener, router)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .into_future();

    let in_flight_timeout = coordinator.config().in_flight_timeout;
    let drain_deadline = async move {
        token.cancelled().await;
        tokio::time::sleep(in_flight_timeout).await;
    };

    let server_result = tokio::select! {
        result = server_future => result.map_err(anyhow::Error::from),
        _ = drain_deadline => {
            tracing::warn!(
                timeout_secs = in_flight_timeout.as_secs(),
                "in-flight deliveries did not finish before the deadline"
            );
            Ok(())
        }
    };

    tracing::info!("server stopped, running shutdown handlers");
    if let Err(e) = coordinator.shutdown().await {
        tracing::error!(error = %e, "error during shutdown");
    }

    server_result
}
