//! Graceful Shutdown Handling
//!
//! Turns SIGTERM / SIGINT into a broadcast the accept loop listens on, then
//! gives in-flight sessions a bounded time to finish on their own.

use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    /// How long in-flight sessions get once accepting stops
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast shutdown to every subscriber
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Shutdown requested with no listeners");
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then broadcast shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Wait for the manager's sessions to finish, up to the shutdown timeout.
    ///
    /// Returns true when every session ended in time. Sessions still running
    /// afterwards are left alone and die with the process.
    pub async fn drain(&self, manager: &ConnectionManager) -> bool {
        let start_time = Instant::now();
        let active = manager.active_sessions();
        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            active, self.timeout
        );

        let drained = manager.wait_for_sessions(self.timeout).await;
        if drained {
            info!("All sessions closed gracefully in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                start_time.elapsed(),
                manager.active_sessions()
            );
        }
        drained
    }
}
