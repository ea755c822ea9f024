//! Outbound connection establishment

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::protocol::constants::*;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("{target} resolved to no addresses")]
    NoAddresses { target: String },

    #[error("timed out connecting to {target}")]
    TimedOut { target: String },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl DialError {
    /// SOCKS5 reply code reported to the client for this failure
    pub fn reply_code(&self) -> u8 {
        match self {
            DialError::Resolve { .. } | DialError::NoAddresses { .. } => {
                SOCKS5_REPLY_HOST_UNREACHABLE
            }
            DialError::TimedOut { .. } => SOCKS5_REPLY_TTL_EXPIRED,
            DialError::Connect { source, .. } => match source.kind() {
                io::ErrorKind::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
                io::ErrorKind::TimedOut => SOCKS5_REPLY_TTL_EXPIRED,
                io::ErrorKind::HostUnreachable => SOCKS5_REPLY_HOST_UNREACHABLE,
                io::ErrorKind::NetworkUnreachable => SOCKS5_REPLY_NETWORK_UNREACHABLE,
                _ => SOCKS5_REPLY_GENERAL_FAILURE,
            },
        }
    }
}

/// Resolves `host:port` targets and connects to the first address that answers
#[derive(Debug, Clone)]
pub struct Dialer {
    timeout: Duration,
}

impl Dialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn dial(&self, target: &str) -> Result<(TcpStream, SocketAddr), DialError> {
        debug!("Attempting to connect to {}", target);

        let addrs: Vec<SocketAddr> = match timeout(self.timeout, lookup_host(target)).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(source)) => {
                return Err(DialError::Resolve {
                    target: target.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(DialError::TimedOut {
                    target: target.to_string(),
                })
            }
        };

        let mut last_error = DialError::NoAddresses {
            target: target.to_string(),
        };
        for addr in addrs {
            match timeout(self.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("Connected to {} via {}", target, addr);
                    return Ok((stream, addr));
                }
                Ok(Err(source)) => {
                    warn!("Failed to connect to {}: {}", addr, source);
                    last_error = DialError::Connect { addr, source };
                }
                Err(_) => {
                    warn!("Connection to {} timed out after {:?}", addr, self.timeout);
                    last_error = DialError::TimedOut {
                        target: target.to_string(),
                    };
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = Dialer::new(Duration::from_secs(5));
        let (_stream, connected) = dialer.dial(&addr.to_string()).await.unwrap();
        assert_eq!(connected, addr);
    }

    #[tokio::test]
    async fn test_refused_maps_to_reply_code() {
        // grab a free port, then close it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = Dialer::new(Duration::from_secs(5));
        let err = dialer.dial(&addr.to_string()).await.unwrap_err();
        assert_eq!(err.reply_code(), SOCKS5_REPLY_CONNECTION_REFUSED);
    }

    #[tokio::test]
    async fn test_unparseable_target() {
        let dialer = Dialer::new(Duration::from_secs(5));
        let err = dialer.dial("no-port-here").await.unwrap_err();
        assert!(matches!(err, DialError::Resolve { .. }));
        assert_eq!(err.reply_code(), SOCKS5_REPLY_HOST_UNREACHABLE);
    }

    #[test]
    fn test_timeout_reply_code() {
        let err = DialError::TimedOut {
            target: "example.com:80".to_string(),
        };
        assert_eq!(err.reply_code(), SOCKS5_REPLY_TTL_EXPIRED);
    }
}
