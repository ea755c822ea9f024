//! Configuration Types

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transform::TransformConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Which half of the proxy pair this process runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Speaks SOCKS5 to client applications
    #[default]
    Local,
    /// Accepts transformed tunnel connections and dials destinations
    Remote,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Local => f.write_str("local"),
            Role::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Role::Local),
            "remote" => Ok(Role::Remote),
            other => Err(format!("unknown role '{}', expected 'local' or 'remote'", other)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub role: Role,
    /// Address to accept connections on, `host:port`
    #[serde(alias = "ln_addr")]
    pub listen_addr: String,
    /// Next hop for the local role; unset means dial destinations directly
    #[serde(alias = "svr_addr", skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    pub max_connections: usize,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            role: Role::Local,
            listen_addr: "127.0.0.1:1080".to_string(),
            remote_addr: None,
            max_connections: 1000,
            buffer_size: 4096,
            dial_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_addr: None,
        }
    }
}
