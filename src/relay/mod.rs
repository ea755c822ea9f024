//! Data Relay Module
//!
//! Bidirectional copy between a client-side and a remote-side connection.

pub mod engine;
pub mod session;

pub use engine::{DirectionEnd, Flow, RelayEngine, RelayError, RelayOutcome};
pub use session::{RelaySession, SessionStats};
