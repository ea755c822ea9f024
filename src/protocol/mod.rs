//! SOCKS5 Protocol Implementation
//!
//! Wire types, the address codec, and the handshake / request handler.

pub mod codec;
pub mod constants;
pub mod error;
pub mod handler;
pub mod types;

pub use constants::*;
pub use error::ProtocolError;
pub use handler::Socks5Handler;
pub use types::*;
