//! Configuration Manager

use std::path::Path;

use anyhow::{bail, Context};

use super::{Config, Role};
use crate::transform::TransformConfig;
use crate::Result;

const MIN_BUFFER_SIZE: usize = 1024;
const MAX_BUFFER_SIZE: usize = 1024 * 1024;
const MAX_CONNECTIONS_LIMIT: usize = 100_000;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// On-disk configuration formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") | Some("cfg") => Ok(ConfigFormat::Json),
            _ => bail!(
                "Unsupported config file extension: {} (expected .toml, .yaml, .yml, .json or .cfg)",
                path.display()
            ),
        }
    }
}

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content, ConfigFormat::from_path(path)?)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Parse configuration text in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Config> {
        let config = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => {
                let mut value: serde_json::Value = serde_json::from_str(content)?;
                // flat `{"ln_addr": ..., "svr_addr": ...}` files describe the server section only
                if let Some(object) = value.as_object() {
                    let flat = !object.contains_key("server")
                        && (object.contains_key("ln_addr") || object.contains_key("svr_addr"));
                    if flat {
                        value = serde_json::json!({ "server": value });
                    }
                }
                serde_json::from_value(value)?
            }
        };
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults overridden by `lookup`
    pub fn load_from_vars<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(role) = lookup("SOCKSTUN_ROLE") {
            config.server.role = role
                .parse::<Role>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid SOCKSTUN_ROLE: {}", role))?;
        }

        if let Some(listen_addr) = lookup("SOCKSTUN_LISTEN_ADDR") {
            config.server.listen_addr = listen_addr;
        }

        if let Some(remote_addr) = lookup("SOCKSTUN_REMOTE_ADDR") {
            config.server.remote_addr = Some(remote_addr).filter(|a| !a.is_empty());
        }

        if let Some(max_conn) = lookup("SOCKSTUN_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid SOCKSTUN_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Some(buffer_size) = lookup("SOCKSTUN_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid SOCKSTUN_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Some(timeout) = lookup("SOCKSTUN_DIAL_TIMEOUT") {
            config.server.dial_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SOCKSTUN_DIAL_TIMEOUT: {}", timeout))?;
        }

        if let Some(log_level) = lookup("SOCKSTUN_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Check that `addr` has the `host:port` shape with a numeric port
fn validate_host_port(field: &str, addr: &str) -> Result<()> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("{} must be host:port, got '{}'", field, addr);
    };
    if host.is_empty() {
        bail!("{} has an empty host: '{}'", field, addr);
    }
    port.parse::<u16>()
        .with_context(|| format!("{} has an invalid port: '{}'", field, addr))?;
    Ok(())
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_transform_config()
            .with_context(|| "Transform configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        validate_host_port("listen_addr", &self.server.listen_addr)?;

        match (&self.server.role, &self.server.remote_addr) {
            (Role::Remote, Some(_)) => {
                bail!("remote_addr is only meaningful for the local role")
            }
            (Role::Local, Some(remote)) => validate_host_port("remote_addr", remote)?,
            _ => {}
        }

        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > MAX_CONNECTIONS_LIMIT {
            bail!("max_connections cannot exceed 100,000");
        }

        if self.server.buffer_size < MIN_BUFFER_SIZE {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.server.buffer_size > MAX_BUFFER_SIZE {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.server.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        if self.server.handshake_timeout.is_zero() {
            bail!("handshake_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_transform_config(&self) -> Result<()> {
        if let TransformConfig::Xor { key } = &self.transform {
            if key.is_empty() {
                bail!("transform.key must not be empty for the xor transform");
            }
        }
        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                LOG_LEVELS.join(", ")
            );
        }
        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        role: Option<Role>,
        listen: Option<&str>,
        remote: Option<&str>,
        log_level: Option<&str>,
    ) {
        if let Some(role) = role {
            self.server.role = role;
            tracing::info!("CLI override: role set to {}", role);
        }

        if let Some(listen) = listen {
            self.server.listen_addr = listen.to_string();
            tracing::info!("CLI override: listen address set to {}", listen);
        }

        if let Some(remote) = remote {
            self.server.remote_addr = Some(remote.to_string()).filter(|r| !r.is_empty());
            tracing::info!("CLI override: remote address set to {}", remote);
        }

        if let Some(level) = log_level {
            self.monitoring.log_level = level.to_string();
        }
    }
}
