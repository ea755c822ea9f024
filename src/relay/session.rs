//! Relay Session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Byte accounting for one client/remote pairing
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    /// Client-facing peer
    pub peer: String,
    /// Next hop or destination, as dialed
    pub target: String,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub peer: String,
    pub target: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl SessionStats {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }
}

impl RelaySession {
    pub fn new(peer: impl ToString, target: impl ToString) -> Self {
        let session = Self {
            session_id: Uuid::new_v4().to_string(),
            peer: peer.to_string(),
            target: target.to_string(),
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        };
        debug!(
            session_id = %session.session_id,
            peer = %session.peer,
            target = %session.target,
            "Relay session created"
        );
        session
    }

    /// Bytes written toward the remote side
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes written toward the client side
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn to_stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            peer: self.peer.clone(),
            target: self.target.clone(),
            duration: self.duration(),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
        }
    }

    pub fn log_stats(&self) {
        let duration = self.duration();
        info!(
            session_id = %self.session_id,
            peer = %self.peer,
            target = %self.target,
            duration_ms = duration.as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            "Relay session completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let session = RelaySession::new("127.0.0.1:5000", "example.com:80");
        session.add_bytes_up(10);
        session.add_bytes_up(5);
        session.add_bytes_down(7);

        let stats = session.to_stats();
        assert_eq!(stats.bytes_up, 15);
        assert_eq!(stats.bytes_down, 7);
        assert_eq!(stats.total_bytes(), 22);
        assert_eq!(stats.target, "example.com:80");
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = RelaySession::new("a", "b");
        let b = RelaySession::new("a", "b");
        assert_ne!(a.session_id, b.session_id);
    }
}
