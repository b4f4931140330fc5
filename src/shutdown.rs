//! Graceful Shutdown Module
//!
//! Listens for SIGINT/SIGTERM and broadcasts a shutdown signal so the accept
//! loop stops taking connections and in-flight requests can drain.

use crate::{GatewayError, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Shutdown coordinator for graceful system shutdown
pub struct ShutdownCoordinator {
    shutdown_sender: broadcast::Sender<()>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_sender, _) = broadcast::channel(16);
        Self { shutdown_sender }
    }

    /// Get shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal::new(self.shutdown_sender.subscribe())
    }

    /// Wait for SIGINT or SIGTERM, then broadcast shutdown
    pub async fn listen_for_shutdown(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigint =
                signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
                    GatewayError::IoError(format!("Failed to create SIGINT handler: {}", e))
                })?;
            let mut sigterm =
                signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
                    GatewayError::IoError(format!("Failed to create SIGTERM handler: {}", e))
                })?;

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await.map_err(|e| {
                GatewayError::IoError(format!("Failed to listen for Ctrl+C: {}", e))
            })?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.initiate_shutdown();
        Ok(())
    }

    /// Broadcast shutdown to every subscriber
    pub fn initiate_shutdown(&self) {
        if let Err(e) = self.shutdown_sender.send(()) {
            // No receivers left; nothing to stop
            debug!("Shutdown signal not sent (no active receivers): {}", e);
        }
    }
}

/// Receiving side of the shutdown broadcast
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
    shutdown_requested: bool,
}

impl ShutdownSignal {
    pub fn new(receiver: broadcast::Receiver<()>) -> Self {
        Self {
            receiver,
            shutdown_requested: false,
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Resolve once shutdown is broadcast or the coordinator is dropped
    pub async fn wait_for_shutdown(&mut self) {
        if self.shutdown_requested {
            return;
        }
        // Ok, Closed and Lagged all mean the coordinator is going away
        let _ = self.receiver.recv().await;
        self.shutdown_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initiate_shutdown_reaches_all_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let mut first = coordinator.subscribe();
        let mut second = coordinator.subscribe();

        coordinator.initiate_shutdown();

        tokio::time::timeout(Duration::from_secs(1), first.wait_for_shutdown())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), second.wait_for_shutdown())
            .await
            .unwrap();
        assert!(first.is_shutdown_requested());
        assert!(second.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_dropped_coordinator_releases_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.subscribe();
        drop(coordinator);

        tokio::time::timeout(Duration::from_secs(1), signal.wait_for_shutdown())
            .await
            .unwrap();
        assert!(signal.is_shutdown_requested());
    }

    #[test]
    fn test_initiate_without_subscribers_is_harmless() {
        ShutdownCoordinator::new().initiate_shutdown();
    }
}
