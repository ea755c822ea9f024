//! sockstun
//!
//! A SOCKS5 front end and a relay that pair up across an obfuscated link.
//! The `local` half speaks SOCKS5 to applications; the `remote` half dials
//! the requested destinations. Bytes between the halves pass through a
//! pluggable [`transform::StreamTransform`].

pub mod config;
pub mod connection;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod shutdown;
pub mod transform;

pub use config::Config;
pub use connection::ConnectionManager;
pub use shutdown::ShutdownCoordinator;

/// Common error type at session and application boundaries
pub type Result<T> = anyhow::Result<T>;
