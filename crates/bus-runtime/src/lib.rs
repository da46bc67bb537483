//! # Bus Runtime Library
//!
//! Pieces of the `bus-runtime` binary, exposed for testing.
//!
//! ## Startup Sequence
//!
//! 1. Select the environment (`SB_ENV`) and load settings
//! 2. Initialize telemetry (logging plus the Prometheus observer)
//! 3. Wire registry, transport and codec; bind one handler per topic
//! 4. Listen until ctrl-c, then stop the broker

pub mod handlers;
pub mod settings;
pub mod wiring;

use std::sync::Arc;

use anyhow::{Context, Result};
use schema_bus::{HandlerBinding, MessageBroker, MessageBrokerApi};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use handlers::LoggingHandler;
pub use settings::{DeployEnv, RuntimeSettings, SettingsError};
pub use wiring::{wire, Wired, WiringError};

/// Owns a broker and its bindings for the process lifetime.
pub struct BusRuntime {
    broker: Arc<MessageBroker>,
    bindings: Vec<HandlerBinding>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl BusRuntime {
    pub fn new(wired: Wired) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            broker: Arc::new(wired.broker),
            bindings: wired.bindings,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// Ask [`run`](Self::run) to stop the broker and return.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            warn!("shutdown requested after the runtime finished");
        }
    }

    /// Listen until [`shutdown`](Self::shutdown) or a fatal broker error.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        if !self.broker.is_enabled() {
            info!("broker disabled, idling until shutdown");
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let listen = self.broker.listen(self.bindings.clone(), cancel.clone());
        tokio::pin!(listen);

        tokio::select! {
            result = &mut listen => {
                return result.context("broker stopped listening");
            }
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                info!("Initiating graceful shutdown...");
            }
        }

        // `stop` waits for the listener to drain, so both are polled together.
        let (listened, stopped) = tokio::join!(&mut listen, self.broker.stop());
        stopped.context("broker stop failed")?;
        listened.context("broker listener failed during shutdown")?;
        info!("Broker stopped");
        Ok(())
    }
}
