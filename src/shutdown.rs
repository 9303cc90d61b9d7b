//! Graceful shutdown coordination.
//!
//! On SIGTERM or SIGINT the coordinator cancels its token, which stops the
//! HTTP listener and lets in-flight deliveries finish (bounded by
//! `in_flight_timeout`). Registered handlers then flush and close their
//! resources within `flush_timeout`.
//!
//! ```rust,no_run
//! use hotel_booking_api::shutdown::{ShutdownConfig, ShutdownCoordinator};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let coordinator = Arc::new(ShutdownCoordinator::new(ShutdownConfig::default()));
//! let token = coordinator.token();
//!
//! tokio::spawn({
//!     let coordinator = coordinator.clone();
//!     async move { coordinator.wait_for_signal().await }
//! });
//!
//! token.cancelled().await;
//! coordinator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::store::UserStore;
use anyhow::{Result, anyhow};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long accepted deliveries may keep running after the stop signal
    pub in_flight_timeout: Duration,
    /// Deadline for all shutdown handlers together
    pub flush_timeout: Duration,
    /// Report success even when handlers miss the deadline
    pub force_shutdown_on_timeout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            in_flight_timeout: Duration::from_secs(30),
            flush_timeout: Duration::from_secs(5),
            force_shutdown_on_timeout: true,
        }
    }
}

impl ShutdownConfig {
    pub fn with_in_flight_timeout(mut self, timeout_secs: u64) -> Self {
        self.in_flight_timeout = Duration::from_secs(timeout_secs);
        self
    }

    pub fn with_flush_timeout(mut self, timeout_secs: u64) -> Self {
        self.flush_timeout = Duration::from_secs(timeout_secs);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    /// Listener closed, in-flight deliveries finishing
    Draining,
    /// Handlers flushing and closing resources
    Flushing,
    Complete,
    /// Handlers missed the deadline or failed
    Forced,
}

/// Trait for components that need to release resources on shutdown
#[async_trait::async_trait]
pub trait ShutdownHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn shutdown(&self) -> Result<()>;

    /// Persist pending writes
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Checks the user store one last time and logs its final size.
pub struct StoreShutdownHandler {
    store: Arc<dyn UserStore>,
}

impl StoreShutdownHandler {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for StoreShutdownHandler {
    fn name(&self) -> &str {
        "user_store"
    }

    /// Writes are committed per call, so closing only confirms the store is
    /// still readable and records its final size.
    async fn shutdown(&self) -> Result<()> {
        let users = self.store.count().await?;
        info!(backend = self.store.backend(), users, "user store closed");
        Ok(())
    }
}

/// Runs handlers in registration order. A failing handler is logged and does
/// not stop the ones after it.
#[derive(Default)]
pub struct CompositeShutdownHandler {
    handlers: Vec<Box<dyn ShutdownHandler>>,
}

impl CompositeShutdownHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Box<dyn ShutdownHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for CompositeShutdownHandler {
    fn name(&self) -> &str {
        "composite"
    }

    async fn shutdown(&self) -> Result<()> {
        let mut failures = 0usize;
        for handler in &self.handlers {
            if let Err(e) = handler.flush().await {
                failures += 1;
                error!(handler = handler.name(), error = %e, "flush failed");
            }
            if let Err(e) = handler.shutdown().await {
                failures += 1;
                error!(handler = handler.name(), error = %e, "shutdown handler failed");
            }
        }
        if failures > 0 {
            return Err(anyhow!("{failures} shutdown step(s) failed"));
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        for handler in &self.handlers {
            if let Err(e) = handler.flush().await {
                error!(handler = handler.name(), error = %e, "flush failed");
            }
        }
        Ok(())
    }
}

/// Owns the shutdown token and the handlers run once the server stops.
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: RwLock<ShutdownPhase>,
    token: CancellationToken,
    handlers: tokio::sync::Mutex<CompositeShutdownHandler>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: RwLock::new(ShutdownPhase::Running),
            token: CancellationToken::new(),
            handlers: tokio::sync::Mutex::new(CompositeShutdownHandler::new()),
        }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Cancelled as soon as shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.read()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn add_handler(&self, handler: Box<dyn ShutdownHandler>) {
        self.handlers.lock().await.add_handler(handler);
    }

    /// Stop accepting work. Idempotent.
    pub fn initiate(&self) {
        let mut phase = self.phase.write();
        if *phase == ShutdownPhase::Running {
            *phase = ShutdownPhase::Draining;
        }
        self.token.cancel();
    }

    /// Wait for SIGINT, SIGTERM or a programmatic cancel, then initiate
    /// shutdown.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating graceful shutdown"),
            _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
            _ = self.token.cancelled() => debug!("shutdown requested"),
        }

        self.initiate();
    }

    /// Run the registered handlers once the listener has stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate();
        *self.phase.write() = ShutdownPhase::Flushing;
        info!(
            timeout_secs = self.config.flush_timeout.as_secs(),
            "running shutdown handlers"
        );

        let handlers = self.handlers.lock().await;
        let result = match timeout(self.config.flush_timeout, handlers.shutdown()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "shutdown handlers exceeded {}s",
                self.config.flush_timeout.as_secs()
            )),
        };

        match result {
            Ok(()) => {
                *self.phase.write() = ShutdownPhase::Complete;
                info!("graceful shutdown completed");
                Ok(())
            }
            Err(e) if self.config.force_shutdown_on_timeout => {
                *self.phase.write() = ShutdownPhase::Forced;
                warn!(error = %e, "graceful shutdown incomplete, forcing exit");
                Ok(())
            }
            Err(e) => {
                *self.phase.write() = ShutdownPhase::Forced;
                error!(error = %e, "graceful shutdown failed");
                Err(e)
            }
        }
    }
}
