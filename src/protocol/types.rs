//! SOCKS5 Protocol Types

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

use crate::protocol::constants::*;
use crate::protocol::error::ProtocolError;

/// Address type discriminator (ATYP)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Domain,
    Ipv6,
}

impl AddressType {
    /// Map a wire code onto the closed set of address types
    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            SOCKS5_ADDR_IPV4 => Ok(AddressType::Ipv4),
            SOCKS5_ADDR_DOMAIN => Ok(AddressType::Domain),
            SOCKS5_ADDR_IPV6 => Ok(AddressType::Ipv6),
            other => Err(ProtocolError::UnsupportedAddressType(other)),
        }
    }

    /// Get the wire code for this address type
    pub fn code(self) -> u8 {
        match self {
            AddressType::Ipv4 => SOCKS5_ADDR_IPV4,
            AddressType::Domain => SOCKS5_ADDR_DOMAIN,
            AddressType::Ipv6 => SOCKS5_ADDR_IPV6,
        }
    }
}

/// Destination host as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    /// Raw domain bytes, not required to be valid UTF-8
    Domain(Bytes),
}

impl Host {
    pub fn address_type(&self) -> AddressType {
        match self {
            Host::Ipv4(_) => AddressType::Ipv4,
            Host::Ipv6(_) => AddressType::Ipv6,
            Host::Domain(_) => AddressType::Domain,
        }
    }

    pub fn domain(name: impl AsRef<[u8]>) -> Self {
        Host::Domain(Bytes::copy_from_slice(name.as_ref()))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ipv4(ip) => write!(f, "{}", ip),
            Host::Ipv6(ip) => write!(f, "{}", ip),
            Host::Domain(name) => write!(f, "{}", String::from_utf8_lossy(name)),
        }
    }
}

/// Destination host plus port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: Host,
    pub port: u16,
}

impl Address {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    pub fn address_type(&self) -> AddressType {
        self.host.address_type()
    }

    /// Render as a `host:port` dial string.
    ///
    /// IPv6 literals and hosts containing a colon are bracketed.
    pub fn dial_target(&self) -> String {
        let host = self.host.to_string();
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dial_target())
    }
}

/// Authentication methods this proxy will select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
}

impl AuthMethod {
    /// Convert to method code
    pub fn method_code(&self) -> u8 {
        match self {
            AuthMethod::NoAuth => SOCKS5_AUTH_NONE,
        }
    }
}

/// Outcome of the method negotiation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub method: AuthMethod,
    /// Methods the client offered; counted, never validated
    pub offered: Vec<u8>,
}

/// A parsed address message plus whatever followed it in the same read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub address: Address,
    /// ATYP | ADDR | PORT exactly as received
    pub raw: Bytes,
    /// Bytes read past the message boundary; forwarded ahead of the relay
    pub extra: Bytes,
}

/// SOCKS5 reply to a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socks5Reply {
    pub reply_code: u8,
}

impl Socks5Reply {
    /// Create a success reply
    pub fn success() -> Self {
        Self {
            reply_code: SOCKS5_REPLY_SUCCESS,
        }
    }

    /// Create an error reply
    pub fn error(reply_code: u8) -> Self {
        Self { reply_code }
    }

    /// The bound address is never reported: ATYP IPv4, 0.0.0.0:0
    pub fn to_bytes(&self) -> [u8; REPLY_LEN] {
        [
            SOCKS5_VERSION,
            self.reply_code,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_IPV4,
            0,
            0,
            0,
            0,
            0,
            0,
        ]
    }
}
