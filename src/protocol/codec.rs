//! Address Codec
//!
//! Encodes and decodes the variable-length `ATYP | ADDR | PORT` message that
//! follows the request prefix on the client side and stands alone on the
//! tunnel between the two halves.
//!
//! ```text
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! +------+----------+----------+
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::constants::*;
use crate::protocol::error::ProtocolError;
use crate::protocol::types::{Address, AddressType, Host};

/// Result of attempting to decode an address message from a partial buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A full message was found; `len` is its length from the ATYP byte on
    Complete { address: Address, len: usize },
    /// At least `needed` bytes in total are required before decoding can finish
    Incomplete { needed: usize },
}

/// Total message length for an address type, once the domain length is known
fn message_len(address_type: AddressType, buf: &[u8]) -> Option<usize> {
    match address_type {
        AddressType::Ipv4 => Some(1 + IPV4_LEN + PORT_LEN),
        AddressType::Ipv6 => Some(1 + IPV6_LEN + PORT_LEN),
        AddressType::Domain => buf.get(1).map(|&len| 1 + 1 + len as usize + PORT_LEN),
    }
}

/// Decode an address message starting at `buf[0]`.
///
/// Bytes past the returned `len` are left for the caller.
pub fn decode(buf: &[u8]) -> Result<Decoded, ProtocolError> {
    let Some(&code) = buf.first() else {
        return Ok(Decoded::Incomplete { needed: 1 });
    };
    let address_type = AddressType::from_code(code)?;

    let len = match message_len(address_type, buf) {
        Some(len) => len,
        // domain length byte not read yet
        None => return Ok(Decoded::Incomplete { needed: 2 }),
    };
    if buf.len() < len {
        return Ok(Decoded::Incomplete { needed: len });
    }

    let host = match address_type {
        AddressType::Ipv4 => {
            let mut octets = [0u8; IPV4_LEN];
            octets.copy_from_slice(&buf[1..1 + IPV4_LEN]);
            Host::Ipv4(Ipv4Addr::from(octets))
        }
        AddressType::Ipv6 => {
            let mut octets = [0u8; IPV6_LEN];
            octets.copy_from_slice(&buf[1..1 + IPV6_LEN]);
            Host::Ipv6(Ipv6Addr::from(octets))
        }
        AddressType::Domain => Host::Domain(Bytes::copy_from_slice(&buf[2..len - PORT_LEN])),
    };
    let port = u16::from_be_bytes([buf[len - 2], buf[len - 1]]);

    Ok(Decoded::Complete {
        address: Address { host, port },
        len,
    })
}

/// Number of bytes `encode` will produce for this address
pub fn encoded_len(address: &Address) -> usize {
    match &address.host {
        Host::Ipv4(_) => 1 + IPV4_LEN + PORT_LEN,
        Host::Ipv6(_) => 1 + IPV6_LEN + PORT_LEN,
        Host::Domain(name) => 1 + 1 + name.len() + PORT_LEN,
    }
}

/// Append the wire form of `address` to `dst`
pub fn encode(address: &Address, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    if let Host::Domain(name) = &address.host {
        if name.len() > u8::MAX as usize {
            return Err(ProtocolError::DomainTooLong(name.len()));
        }
    }

    dst.reserve(encoded_len(address));
    dst.put_u8(address.address_type().code());
    match &address.host {
        Host::Ipv4(ip) => dst.put_slice(&ip.octets()),
        Host::Ipv6(ip) => dst.put_slice(&ip.octets()),
        Host::Domain(name) => {
            dst.put_u8(name.len() as u8);
            dst.put_slice(name);
        }
    }
    dst.put_u16(address.port);
    Ok(())
}

/// Convenience wrapper returning a frozen buffer
pub fn encode_to_bytes(address: &Address) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(encoded_len(address));
    encode(address, &mut buf)?;
    Ok(buf.freeze())
}
