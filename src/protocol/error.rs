//! Protocol error taxonomy

use thiserror::Error;

use crate::protocol::constants::*;

/// Errors raised while negotiating or parsing a SOCKS5 exchange.
///
/// Every variant aborts the current session only.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("socks version not supported: {0}")]
    UnsupportedVersion(u8),

    #[error("socks command not supported: {0}")]
    UnsupportedCommand(u8),

    #[error("socks address type not supported: {0}")]
    UnsupportedAddressType(u8),

    /// More bytes arrived than the message declares
    #[error("trailing data after {kind}: expected {expected} bytes, got {actual}")]
    TrailingData {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The peer closed before the computed message boundary
    #[error("connection closed after {received} of {expected} bytes")]
    IncompleteRead { expected: usize, received: usize },

    #[error("domain name too long: {0} bytes")]
    DomainTooLong(usize),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Reply code sent to a client-facing peer before the session is closed,
    /// if the failure happened at a point where a reply is meaningful.
    pub fn reply_code(&self) -> Option<u8> {
        match self {
            ProtocolError::UnsupportedCommand(_) => Some(SOCKS5_REPLY_COMMAND_NOT_SUPPORTED),
            ProtocolError::UnsupportedAddressType(_) => {
                Some(SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED)
            }
            _ => None,
        }
    }

    /// True for violations of the wire protocol, as opposed to transport failures
    pub fn is_violation(&self) -> bool {
        !matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::IncompleteRead { .. }
        )
    }
}
