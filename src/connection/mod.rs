//! Connection Management Module
//!
//! Accepting connections, dialing outbound, and sequencing each session.

pub mod dialer;
pub mod manager;
pub mod orchestrator;

pub use dialer::{DialError, Dialer};
pub use manager::ConnectionManager;
pub use orchestrator::{classify, ErrorClass, SessionOrchestrator};
