//! Connection Manager Implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use super::orchestrator::{classify, ErrorClass, SessionOrchestrator};
use crate::config::{Config, Role};
use crate::metrics::Metrics;
use crate::Result;

/// Accepts connections and runs one session task per connection
pub struct ConnectionManager {
    listener: TcpListener,
    orchestrator: SessionOrchestrator,
    metrics: Option<Arc<Metrics>>,
    connection_slots: Arc<Semaphore>,
    max_connections: usize,
    active_connections: Arc<AtomicUsize>,
    next_connection_id: AtomicUsize,
}

impl ConnectionManager {
    /// Bind the configured listen address
    pub async fn bind(config: &Config, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        let listen_addr = &config.server.listen_addr;
        info!("Binding TCP listener to {}", listen_addr);
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", listen_addr))?;

        let mut orchestrator = SessionOrchestrator::from_config(config);
        if let Some(metrics) = &metrics {
            orchestrator = orchestrator.with_metrics(Arc::clone(metrics));
        }

        let max_connections = config.server.max_connections;
        Ok(Self {
            listener,
            orchestrator,
            metrics,
            connection_slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicUsize::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn role(&self) -> Role {
        self.orchestrator.role()
    }

    /// Number of sessions currently being handled
    pub fn active_sessions(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Accept connections until a shutdown signal arrives.
    ///
    /// Sessions already running are not cancelled; see [`Self::wait_for_sessions`].
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            role = %self.orchestrator.role(),
            transform = self.orchestrator.transform().name(),
            "Starting connection acceptance loop on {}",
            self.local_addr()?
        );

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.dispatch(stream, addr),
                        Err(e) => {
                            // keep accepting; per-connection failures are not fatal
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        let slot = match Arc::clone(&self.connection_slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(_) => {
                warn!(
                    "Connection limit of {} reached, rejecting connection from {}",
                    self.max_connections, addr
                );
                return;
            }
        };

        let connection_id = format!(
            "conn_{}",
            self.next_connection_id.fetch_add(1, Ordering::Relaxed)
        );
        debug!("Accepted connection {} from {}", connection_id, addr);

        let orchestrator = self.orchestrator.clone();
        let metrics = self.metrics.clone();
        let active_connections = Arc::clone(&self.active_connections);

        tokio::spawn(async move {
            let _slot = slot;
            active_connections.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &metrics {
                metrics.session_started();
            }

            handle_connection(orchestrator, metrics.as_deref(), stream, addr, connection_id).await;

            if let Some(metrics) = &metrics {
                metrics.session_ended();
            }
            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Wait until every session has released its slot, or `timeout` passes.
    pub async fn wait_for_sessions(&self, timeout: Duration) -> bool {
        let permits = u32::try_from(self.max_connections).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.connection_slots.acquire_many(permits)).await {
            Ok(Ok(all)) => {
                drop(all);
                true
            }
            _ => false,
        }
    }
}

#[instrument(skip_all, fields(connection_id = %connection_id, peer = %addr))]
async fn handle_connection(
    orchestrator: SessionOrchestrator,
    metrics: Option<&Metrics>,
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: String,
) {
    let start = Instant::now();

    match orchestrator.handle(stream, addr).await {
        Ok(outcome) => {
            debug!(
                session_id = %outcome.stats.session_id,
                bytes_up = outcome.stats.bytes_up,
                bytes_down = outcome.stats.bytes_down,
                "Session finished"
            );
        }
        Err(e) => match classify(&e) {
            ErrorClass::Expected => debug!("Client closed before sending a request"),
            ErrorClass::Violation(kind) => {
                warn!("Protocol violation from {}: {:#}", addr, e);
                if let Some(metrics) = metrics {
                    metrics.record_failure(kind);
                }
            }
            ErrorClass::Transport(kind) => {
                error!("Session from {} failed: {:#}", addr, e);
                if let Some(metrics) = metrics {
                    metrics.record_failure(kind);
                }
            }
        },
    }

    debug!("Connection {} closed after {:?}", connection_id, start.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config(max_connections: usize) -> Config {
        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:0".to_string();
        config.server.max_connections = max_connections;
        config.server.handshake_timeout = Duration::from_secs(2);
        config
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let manager = ConnectionManager::bind(&test_config(4), None).await.unwrap();
        let addr = manager.local_addr().unwrap();
        assert!(addr.port() != 0);
        assert_eq!(manager.role(), Role::Local);
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let manager = Arc::new(ConnectionManager::bind(&test_config(4), None).await.unwrap());
        let (tx, rx) = broadcast::channel(1);

        let run = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run(rx).await }
        });

        tx.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(manager.wait_for_sessions(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_bad_client_does_not_stop_listener() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let manager = Arc::new(
            ConnectionManager::bind(&test_config(4), Some(Arc::clone(&metrics)))
                .await
                .unwrap(),
        );
        let addr = manager.local_addr().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let run = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run(rx).await }
        });

        // wrong protocol version; the server just hangs up
        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(&[4, 1]).await.unwrap();
        let mut buf = Vec::new();
        bad.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        // a well-formed greeting on a new connection still gets answered
        let mut good = TcpStream::connect(addr).await.unwrap();
        good.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        good.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);
        drop(good);

        tx.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(manager.wait_for_sessions(Duration::from_secs(5)).await);
        assert_eq!(metrics.total_sessions(), 2);
        assert_eq!(metrics.failures(crate::metrics::FailureKind::Protocol), 1);
    }
}
