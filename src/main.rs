//! sockstun - SOCKS5 front end and relay pair

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sockstun::{
    config::{Config, ConfigManager, Role},
    metrics::{Metrics, MetricsServer},
    ConnectionManager, ShutdownCoordinator,
};

/// CLI arguments for sockstun
#[derive(Parser, Debug)]
#[command(name = "sockstun")]
#[command(about = "SOCKS5 front end and relay pair with an obfuscated link between them")]
#[command(version)]
#[command(long_about = "
sockstun runs one half of a proxy pair.

  local   accepts SOCKS5 clients. With a remote address configured it
          forwards each request over a transformed tunnel; without one it
          connects to destinations itself.
  remote  accepts tunnel connections from a local instance and connects
          to the requested destinations.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  SOCKSTUN_ROLE             - local or remote
  SOCKSTUN_LISTEN_ADDR      - Listen address (e.g., 127.0.0.1:1080)
  SOCKSTUN_REMOTE_ADDR      - Next hop for the local role
  SOCKSTUN_MAX_CONNECTIONS  - Maximum concurrent connections
  SOCKSTUN_BUFFER_SIZE      - Relay buffer size in bytes
  SOCKSTUN_DIAL_TIMEOUT     - Outbound connect timeout (e.g., 10s)
  SOCKSTUN_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path (.toml, .yaml, .yml, .json or .cfg)
    #[arg(short, long, default_value = "sockstun.toml")]
    pub config: PathBuf,

    /// Which half of the pair to run
    #[arg(long, value_enum)]
    pub role: Option<Role>,

    /// Listen address (overrides config file)
    #[arg(short, long, help = "Listen address (e.g., 127.0.0.1:1080)")]
    pub listen: Option<String>,

    /// Next hop for the local role (overrides config file)
    #[arg(short, long, help = "Remote relay address (e.g., relay.example.net:8388)")]
    pub remote: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = load_config(&args)?;
    init_tracing(&config, args.verbose);

    info!("Starting sockstun v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        log_summary(&config);
        return Ok(());
    }
    log_summary(&config);

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let metrics_handle = match config.monitoring.metrics_addr {
        Some(addr) => {
            let server = MetricsServer::bind(Arc::clone(&metrics), addr)
                .await
                .with_context(|| format!("Failed to bind metrics server on {}", addr))?;
            Some(tokio::spawn(server.run()))
        }
        None => None,
    };

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);
    let manager = Arc::new(ConnectionManager::bind(&config, Some(Arc::clone(&metrics))).await?);

    let server_handle = tokio::spawn({
        let manager = Arc::clone(&manager);
        let shutdown_rx = shutdown_coordinator.subscribe();
        async move { manager.run(shutdown_rx).await }
    });

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error: {:#}", e),
        Err(e) => error!("Server task failed: {}", e),
    }

    if !shutdown_coordinator.drain(&manager).await {
        warn!("Exiting with sessions still open");
    }

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("Server shutdown complete");
    Ok(())
}

/// CLI > config file > environment > defaults
fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.role,
        args.listen.as_deref(),
        args.remote.as_deref(),
        args.log_level.as_deref(),
    );

    config
        .validate()
        .context("Final configuration validation failed")?;
    Ok(config)
}

fn log_summary(config: &Config) {
    info!("  Role: {}", config.server.role);
    info!("  Listen address: {}", config.server.listen_addr);
    match (&config.server.role, &config.server.remote_addr) {
        (Role::Local, Some(remote)) => info!("  Next hop: {}", remote),
        (Role::Local, None) => info!("  Next hop: none, connecting directly"),
        (Role::Remote, _) => {}
    }
    info!("  Transform: {}", config.transform.name());
    info!("  Max connections: {}", config.server.max_connections);
    info!("  Buffer size: {} bytes", config.server.buffer_size);
    if let Some(addr) = config.monitoring.metrics_addr {
        info!("  Metrics: http://{}/metrics", addr);
    }
}

/// Initialize tracing/logging
fn init_tracing(config: &Config, verbose: bool) {
    let log_level = if verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .init();
}
