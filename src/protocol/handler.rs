//! SOCKS5 Protocol Handler
//!
//! Negotiates the method exchange and reads connect requests. Every message
//! is framed by reading until its computed length is reached, so a message
//! split across several reads parses exactly like one delivered at once.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::codec::{self, Decoded};
use super::{AuthMethod, HandshakeResult, ProtocolError, Socks5Reply, WireRequest};
use crate::protocol::constants::*;

/// Read into `buf` until at least `min` bytes are filled.
///
/// `buf` bounds how far a single read may overshoot; pass `&mut buf[..min]`
/// to stop exactly at `min`.
async fn read_at_least<R>(
    reader: &mut R,
    buf: &mut [u8],
    mut filled: usize,
    min: usize,
) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    while filled < min {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::IncompleteRead {
                expected: min,
                received: filled,
            });
        }
        trace!("read {} bytes ({} of {} wanted)", n, filled + n, min);
        filled += n;
    }
    Ok(filled)
}

/// SOCKS5 protocol handler for one connection
pub struct Socks5Handler<S> {
    stream: S,
}

impl<S> Socks5Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new SOCKS5 handler for the given stream
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Handle the version / method negotiation.
    ///
    /// ```text
    /// +----+----------+----------+
    /// |VER | NMETHODS | METHODS  |
    /// +----+----------+----------+
    /// | 1  |    1     | 1 to 255 |
    /// +----+----------+----------+
    /// ```
    ///
    /// "No authentication" is always selected; the method list is only counted.
    pub async fn handle_handshake(&mut self) -> Result<HandshakeResult, ProtocolError> {
        let mut buf = [0u8; MAX_GREETING_LEN];

        let filled = read_at_least(&mut self.stream, &mut buf, 0, 2).await?;
        if buf[0] != SOCKS5_VERSION {
            return Err(ProtocolError::UnsupportedVersion(buf[0]));
        }

        let msg_len = 2 + buf[1] as usize;
        if filled > msg_len {
            return Err(ProtocolError::TrailingData {
                kind: "greeting",
                expected: msg_len,
                actual: filled,
            });
        }
        let filled = read_at_least(&mut self.stream, &mut buf[..msg_len], filled, msg_len).await?;

        let method = AuthMethod::NoAuth;
        self.stream
            .write_all(&[SOCKS5_VERSION, method.method_code()])
            .await?;
        self.stream.flush().await?;

        debug!("SOCKS5 handshake done, {} methods offered", msg_len - 2);
        Ok(HandshakeResult {
            method,
            offered: buf[2..filled].to_vec(),
        })
    }

    /// Read a client-facing connect request.
    ///
    /// ```text
    /// +----+-----+-------+------+----------+----------+
    /// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    /// +----+-----+-------+------+----------+----------+
    /// | 1  |  1  | X'00' |  1   | Variable |    2     |
    /// +----+-----+-------+------+----------+----------+
    /// ```
    pub async fn read_request(&mut self) -> Result<WireRequest, ProtocolError> {
        let mut buf = [0u8; MAX_REQUEST_LEN];

        // prefix, ATYP and a possible domain length byte
        let filled = read_at_least(&mut self.stream, &mut buf, 0, REQUEST_PREFIX_LEN + 2).await?;
        if buf[0] != SOCKS5_VERSION {
            return Err(ProtocolError::UnsupportedVersion(buf[0]));
        }
        if buf[1] != SOCKS5_CMD_CONNECT {
            return Err(ProtocolError::UnsupportedCommand(buf[1]));
        }

        self.read_address(&mut buf, REQUEST_PREFIX_LEN, filled).await
    }

    /// Read a tunnel-facing request: the bare `ATYP | ADDR | PORT` message
    pub async fn read_tunnel_request(&mut self) -> Result<WireRequest, ProtocolError> {
        let mut buf = [0u8; MAX_ADDRESS_LEN];
        let filled = read_at_least(&mut self.stream, &mut buf, 0, 2).await?;
        self.read_address(&mut buf, 0, filled).await
    }

    /// Finish reading the address message that starts at `buf[offset]`
    async fn read_address(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        mut filled: usize,
    ) -> Result<WireRequest, ProtocolError> {
        loop {
            match codec::decode(&buf[offset..filled])? {
                Decoded::Complete { address, len } => {
                    let end = offset + len;
                    let request = WireRequest {
                        address,
                        raw: Bytes::copy_from_slice(&buf[offset..end]),
                        extra: Bytes::copy_from_slice(&buf[end..filled]),
                    };
                    debug!(
                        target_addr = %request.address,
                        extra = request.extra.len(),
                        "SOCKS5 request parsed"
                    );
                    return Ok(request);
                }
                Decoded::Incomplete { needed } => {
                    let end = offset + needed;
                    filled = read_at_least(&mut self.stream, &mut buf[..end], filled, end).await?;
                }
            }
        }
    }

    /// Send a reply to the client
    pub async fn send_reply(&mut self, reply: Socks5Reply) -> Result<(), ProtocolError> {
        self.stream.write_all(&reply.to_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Get the underlying stream back for relaying
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Host;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tokio_test::io::Builder;

    const EXAMPLE_REQUEST: &[u8] = &[
        0x05, 0x01, 0x00, 0x03, 0x0b, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'c', b'o',
        b'm', 0x00, 0x50,
    ];

    /// Build a mock that delivers `data` in the given chunk sizes
    fn chunked(data: &[u8], chunk: usize) -> Builder {
        let mut builder = Builder::new();
        for piece in data.chunks(chunk) {
            builder.read(piece);
        }
        builder
    }

    #[tokio::test]
    async fn test_handshake_selects_no_auth() {
        let stream = Builder::new().read(&[5, 2, 0, 2]).write(&[5, 0]).build();
        let mut handler = Socks5Handler::new(stream);

        let result = handler.handle_handshake().await.unwrap();
        assert_eq!(result.method, AuthMethod::NoAuth);
        assert_eq!(result.offered, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_handshake_across_partial_reads() {
        let stream = Builder::new()
            .read(&[5])
            .read(&[3, 0])
            .read(&[1])
            .read(&[2])
            .write(&[5, 0])
            .build();
        let mut handler = Socks5Handler::new(stream);

        let result = handler.handle_handshake().await.unwrap();
        assert_eq!(result.offered, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_handshake_zero_methods_accepted() {
        let stream = Builder::new().read(&[5, 0]).write(&[5, 0]).build();
        let mut handler = Socks5Handler::new(stream);

        let result = handler.handle_handshake().await.unwrap();
        assert!(result.offered.is_empty());
    }

    #[tokio::test]
    async fn test_handshake_rejects_trailing_data() {
        let stream = Builder::new().read(&[5, 2, 0, 0, 0xff]).build();
        let mut handler = Socks5Handler::new(stream);

        let err = handler.handle_handshake().await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TrailingData {
                expected: 4,
                actual: 5,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_handshake_rejects_wrong_version() {
        let stream = Builder::new().read(&[4, 1, 0]).build();
        let mut handler = Socks5Handler::new(stream);

        let err = handler.handle_handshake().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(4)));
    }

    #[tokio::test]
    async fn test_handshake_incomplete_read() {
        let stream = Builder::new().read(&[5, 3, 0]).build();
        let mut handler = Socks5Handler::new(stream);

        let err = handler.handle_handshake().await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IncompleteRead {
                expected: 5,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_example_request_parses() {
        let stream = Builder::new().read(EXAMPLE_REQUEST).build();
        let mut handler = Socks5Handler::new(stream);

        let request = handler.read_request().await.unwrap();
        assert_eq!(request.address.dial_target(), "example.com:80");
        assert_eq!(request.address.host, Host::domain("example.com"));
        assert_eq!(&request.raw[..], &EXAMPLE_REQUEST[3..]);
        assert!(request.extra.is_empty());
    }

    #[tokio::test]
    async fn test_request_parses_identically_for_every_chunking() {
        for chunk in 1..=EXAMPLE_REQUEST.len() {
            let mut handler = Socks5Handler::new(chunked(EXAMPLE_REQUEST, chunk).build());
            let request = handler.read_request().await.unwrap();
            assert_eq!(request.address.dial_target(), "example.com:80", "chunk {}", chunk);
            assert_eq!(&request.raw[..], &EXAMPLE_REQUEST[3..], "chunk {}", chunk);
            assert!(request.extra.is_empty(), "chunk {}", chunk);
        }
    }

    #[tokio::test]
    async fn test_request_captures_pipelined_bytes() {
        let mut data = EXAMPLE_REQUEST.to_vec();
        data.extend_from_slice(b"GET / HTTP/1.1\r\n");
        let stream = Builder::new().read(&data).build();
        let mut handler = Socks5Handler::new(stream);

        let request = handler.read_request().await.unwrap();
        assert_eq!(&request.extra[..], b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn test_request_ipv6() {
        let mut data = vec![5, 1, 0, SOCKS5_ADDR_IPV6];
        data.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        data.extend_from_slice(&443u16.to_be_bytes());
        let mut handler = Socks5Handler::new(chunked(&data, 6).build());

        let request = handler.read_request().await.unwrap();
        assert_eq!(request.address.dial_target(), "[::1]:443");
    }

    #[tokio::test]
    async fn test_request_rejects_unknown_address_type() {
        let stream = Builder::new().read(&[5, 1, 0, 2, 1, 2, 3, 4, 0, 80]).build();
        let mut handler = Socks5Handler::new(stream);

        let err = handler.read_request().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedAddressType(2)));
        assert_eq!(err.reply_code(), Some(SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED));
    }

    #[tokio::test]
    async fn test_request_rejects_bind_command() {
        let stream = Builder::new().read(&[5, 2, 0, 1, 0, 0, 0, 0, 0, 0]).build();
        let mut handler = Socks5Handler::new(stream);

        let err = handler.read_request().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedCommand(2)));
    }

    #[tokio::test]
    async fn test_request_rejects_wrong_version() {
        let stream = Builder::new().read(&[4, 1, 0, 1, 0, 0, 0, 0, 0, 0]).build();
        let mut handler = Socks5Handler::new(stream);

        let err = handler.read_request().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(4)));
    }

    #[tokio::test]
    async fn test_request_closed_before_boundary() {
        let stream = Builder::new().read(&[5, 1, 0, 3, 11, b'e', b'x']).build();
        let mut handler = Socks5Handler::new(stream);

        let err = handler.read_request().await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IncompleteRead {
                expected: 18,
                received: 7
            }
        ));
    }

    #[tokio::test]
    async fn test_tunnel_request_without_prefix() {
        let data = [SOCKS5_ADDR_IPV4, 127, 0, 0, 1, 0x1f, 0x90, b'h', b'i'];
        let stream = Builder::new().read(&data).build();
        let mut handler = Socks5Handler::new(stream);

        let request = handler.read_tunnel_request().await.unwrap();
        assert_eq!(request.address.host, Host::Ipv4(Ipv4Addr::LOCALHOST));
        assert_eq!(request.address.port, 8080);
        assert_eq!(&request.raw[..], &data[..7]);
        assert_eq!(&request.extra[..], b"hi");
    }

    #[tokio::test]
    async fn test_tunnel_request_for_every_chunking() {
        let data = &EXAMPLE_REQUEST[3..];
        for chunk in 1..=data.len() {
            let mut handler = Socks5Handler::new(chunked(data, chunk).build());
            let request = handler.read_tunnel_request().await.unwrap();
            assert_eq!(request.address.dial_target(), "example.com:80", "chunk {}", chunk);
        }
    }

    #[tokio::test]
    async fn test_tunnel_request_empty_domain() {
        let stream = Builder::new().read(&[SOCKS5_ADDR_DOMAIN, 0, 0, 80]).build();
        let mut handler = Socks5Handler::new(stream);

        let request = handler.read_tunnel_request().await.unwrap();
        assert_eq!(request.address.host, Host::domain(""));
        assert_eq!(request.address.port, 80);
    }

    #[tokio::test]
    async fn test_send_success_reply() {
        let stream = Builder::new().write(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).build();
        let mut handler = Socks5Handler::new(stream);

        handler.send_reply(Socks5Reply::success()).await.unwrap();
    }
}
