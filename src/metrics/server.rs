//! Metrics HTTP Server
//!
//! Minimal HTTP/1.1 endpoint for Prometheus scraping.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::metrics::Metrics;

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    listener: TcpListener,
}

impl MetricsServer {
    pub async fn bind(metrics: Arc<Metrics>, addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { metrics, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the task is dropped
    pub async fn run(self) {
        info!(bind_addr = ?self.listener.local_addr().ok(), "Metrics server started");

        loop {
            match self.listener.accept().await {
                Ok((mut stream, addr)) => {
                    debug!(client_addr = %addr, "Metrics request received");

                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_request(&mut stream, metrics).await {
                            error!(error = %e, client_addr = %addr, "Failed to handle metrics request");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

async fn handle_request(stream: &mut TcpStream, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    // only the request line matters
    let mut buffer = [0; 1024];
    let bytes_read = stream.read(&mut buffer).await?;
    if bytes_read == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let response = if request.starts_with("GET /metrics") {
        let body = metrics.export_prometheus();
        format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            body.len(),
            body
        )
    } else {
        "HTTP/1.1 404 Not Found\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: 9\r\n\
         Connection: close\r\n\
         \r\n\
         Not Found"
            .to_string()
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
