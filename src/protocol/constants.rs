//! SOCKS5 Protocol Constants

// SOCKS5 Protocol Version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 Commands
pub const SOCKS5_CMD_CONNECT: u8 = 0x01;

// Address Types
pub const SOCKS5_ADDR_IPV4: u8 = 0x01;
pub const SOCKS5_ADDR_DOMAIN: u8 = 0x03;
pub const SOCKS5_ADDR_IPV6: u8 = 0x04;

// Authentication Methods
pub const SOCKS5_AUTH_NONE: u8 = 0x00;

// Response Codes
pub const SOCKS5_REPLY_SUCCESS: u8 = 0x00;
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

// Reserved field value
pub const SOCKS5_RESERVED: u8 = 0x00;

// Message sizes
pub const IPV4_LEN: usize = 4;
pub const IPV6_LEN: usize = 16;
pub const PORT_LEN: usize = 2;

/// VER + NMETHODS + up to 256 methods
pub const MAX_GREETING_LEN: usize = 1 + 1 + 256;

/// VER + CMD + RSV, the prefix stripped before the address on the client side
pub const REQUEST_PREFIX_LEN: usize = 3;

/// ATYP + length byte + up to 256 address bytes + port
pub const MAX_ADDRESS_LEN: usize = 1 + 1 + 256 + PORT_LEN;

/// Largest client-facing connect request (263 bytes)
pub const MAX_REQUEST_LEN: usize = REQUEST_PREFIX_LEN + MAX_ADDRESS_LEN;

/// Length of the fixed success / failure reply
pub const REPLY_LEN: usize = 10;
