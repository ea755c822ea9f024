//! Metrics Module
//!
//! Prometheus counters for sessions and relayed bytes, plus a scrape endpoint.

pub mod collector;
pub mod server;

pub use collector::{FailureKind, Metrics};
pub use server::MetricsServer;
