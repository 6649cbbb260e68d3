//! # ShellCN Server
//!
//! The gateway bootstrap: logger → configuration → core initialization →
//! signal-driven shutdown. The HTTP/WebSocket adapter mounts on top of the
//! [`Core`](shellcn::Core) this crate wires; the core itself stays transport-
//! agnostic.
//!
//! ## Example
//! ```no_run
//! use shellcn_server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Server::builder().build().await?.run().await
//! }
//! ```

use anyhow::{Context, Result};
use shellcn::Core;
use shellcn::domain::config::CoreConfig;
use shellcn_event_bus::EventBus;
use shellcn_repository::MemoryStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// A fluent builder for configuring and initializing the [`Server`].
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug, Default)]
pub struct ServerBuilder {
    cfg: CoreConfig,
}

impl ServerBuilder {
    /// Set up the server's configuration.
    pub fn config(mut self, cfg: CoreConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Consumes the builder and initializes the server.
    ///
    /// # Process
    /// 1. Constructs the backing store and the event bus
    /// 2. Initializes the core (registries, vault, providers, coordinator)
    ///
    /// # Errors
    /// Returns an error if core initialization fails (duplicate registrations,
    /// provider misconfiguration, unreachable identity providers).
    pub async fn build(self) -> Result<Server> {
        info!("Initializing server");

        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new();

        let core = shellcn::init(self.cfg, store, events)
            .await
            .map_err(|e| anyhow::anyhow!("Core bootstrap failed: {e}"))?;

        Ok(Server { core })
    }
}

/// A fully initialized server instance ready to run.
#[must_use = "call .run().await to start the server"]
#[derive(Debug)]
pub struct Server {
    core: Core,
}

impl Server {
    /// Returns a new [`ServerBuilder`] to configure the server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Runs until the shutdown signal is received, then closes every live
    /// session within the configured grace period.
    ///
    /// # Errors
    /// Returns an error if signal handlers cannot be installed.
    pub async fn run(self) -> Result<()> {
        info!("Server started; waiting for shutdown signal");

        if let Err(e) = shutdown_signal().await {
            error!("Error while waiting for shutdown signal: {e}");
        }
        info!("Shutdown signal received, starting graceful shutdown...");

        self.core.shutdown().await;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Returns a reference to the wired core.
    #[must_use]
    pub const fn core(&self) -> &Core {
        &self.core
    }
}

/// Listens for shutdown signals (Ctrl+C, SIGTERM).
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => {
            res.context("Ctrl+C signal received")?;
        },
        res = terminate => {
            res.context("SIGTERM signal received")?;
        },
    }

    Ok(())
}
