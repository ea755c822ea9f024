//! Metrics Collector

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::error;

use crate::relay::SessionStats;

/// Session failure categories used as the `kind` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Malformed or unsupported SOCKS5 / tunnel request
    Protocol,
    /// Destination or next hop could not be reached
    Dial,
    /// Negotiation did not finish within the handshake timeout
    Timeout,
    /// Relay ended with an unexpected I/O error
    Relay,
    /// Any other transport error before the relay started
    Transport,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Protocol => "protocol",
            FailureKind::Dial => "dial",
            FailureKind::Timeout => "timeout",
            FailureKind::Relay => "relay",
            FailureKind::Transport => "transport",
        }
    }
}

/// Prometheus metrics for the proxy
pub struct Metrics {
    registry: Registry,
    sessions_total: IntCounter,
    active_sessions: IntGauge,
    bytes_relayed_total: IntCounterVec,
    session_failures_total: IntCounterVec,
    session_duration: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let sessions_total = IntCounter::new(
            "sockstun_sessions_total",
            "Total number of accepted connections",
        )?;

        let active_sessions = IntGauge::new(
            "sockstun_active_sessions",
            "Number of connections currently being handled",
        )?;

        let bytes_relayed_total = IntCounterVec::new(
            Opts::new(
                "sockstun_bytes_relayed_total",
                "Total bytes relayed, by direction",
            ),
            &["direction"],
        )?;

        let session_failures_total = IntCounterVec::new(
            Opts::new(
                "sockstun_session_failures_total",
                "Sessions that ended in failure, by kind",
            ),
            &["kind"],
        )?;

        let session_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sockstun_session_duration_seconds",
                "Duration of relayed sessions in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
        )?;

        registry.register(Box::new(sessions_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(bytes_relayed_total.clone()))?;
        registry.register(Box::new(session_failures_total.clone()))?;
        registry.register(Box::new(session_duration.clone()))?;

        Ok(Self {
            registry,
            sessions_total,
            active_sessions,
            bytes_relayed_total,
            session_failures_total,
            session_duration,
        })
    }

    /// A connection was accepted and handed to a session task
    pub fn session_started(&self) {
        self.sessions_total.inc();
        self.active_sessions.inc();
    }

    /// The session task finished, however it ended
    pub fn session_ended(&self) {
        self.active_sessions.dec();
    }

    /// Fold a finished relay into the byte and duration metrics
    pub fn record_relay(&self, stats: &SessionStats) {
        self.bytes_relayed_total
            .with_label_values(&["up"])
            .inc_by(stats.bytes_up);
        self.bytes_relayed_total
            .with_label_values(&["down"])
            .inc_by(stats.bytes_down);
        self.session_duration.observe(stats.duration.as_secs_f64());
    }

    pub fn record_failure(&self, kind: FailureKind) {
        self.session_failures_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.get()
    }

    pub fn total_sessions(&self) -> u64 {
        self.sessions_total.get()
    }

    pub fn bytes_relayed(&self, direction: &str) -> u64 {
        self.bytes_relayed_total
            .with_label_values(&[direction])
            .get()
    }

    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.session_failures_total
            .with_label_values(&[kind.as_str()])
            .get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stats(up: u64, down: u64) -> SessionStats {
        SessionStats {
            session_id: "s".to_string(),
            peer: "p".to_string(),
            target: "t".to_string(),
            duration: Duration::from_millis(250),
            bytes_up: up,
            bytes_down: down,
        }
    }

    #[test]
    fn test_session_lifecycle_counts() {
        let metrics = Metrics::new().unwrap();
        metrics.session_started();
        metrics.session_started();
        metrics.session_ended();

        assert_eq!(metrics.total_sessions(), 2);
        assert_eq!(metrics.active_sessions(), 1);
    }

    #[test]
    fn test_relay_bytes_by_direction() {
        let metrics = Metrics::new().unwrap();
        metrics.record_relay(&stats(100, 20));
        metrics.record_relay(&stats(1, 2));

        assert_eq!(metrics.bytes_relayed("up"), 101);
        assert_eq!(metrics.bytes_relayed("down"), 22);
    }

    #[test]
    fn test_export_contains_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.session_started();
        metrics.record_failure(FailureKind::Dial);
        metrics.record_relay(&stats(5, 5));

        let text = metrics.export_prometheus();
        assert!(text.contains("sockstun_sessions_total 1"));
        assert!(text.contains("sockstun_session_failures_total{kind=\"dial\"} 1"));
        assert!(text.contains("sockstun_bytes_relayed_total{direction=\"up\"} 5"));
        assert!(text.contains("sockstun_session_duration_seconds_count 1"));
    }
}
