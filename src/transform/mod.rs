//! Stream Transform
//!
//! A symmetric, invertible transform applied to every byte crossing the link
//! between the two proxy halves. Each wrapped connection owns one encoder
//! (write path) and one decoder (read path).

pub mod cipher;
pub mod stream;

use serde::{Deserialize, Serialize};

pub use cipher::{ByteShift, Passthrough, RollingXor};
pub use stream::TransformStream;

/// In-place, length-preserving byte transform.
///
/// Implementations may keep state across calls (a keystream position, say);
/// callers only guarantee that bytes are fed in stream order.
pub trait StreamTransform: Send {
    fn apply(&mut self, buf: &mut [u8]);
}

/// Which half of a transform pair to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encode,
    Decode,
}

fn default_offset() -> u8 {
    1
}

/// Transform selection as it appears in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransformConfig {
    /// Bytes cross the link unchanged
    None,
    /// Add `offset` on encode, subtract it on decode
    Shift {
        #[serde(default = "default_offset")]
        offset: u8,
    },
    /// Repeating-key XOR
    Xor { key: String },
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig::Shift {
            offset: default_offset(),
        }
    }
}

impl TransformConfig {
    /// Build a fresh transform instance for one direction of one connection
    pub fn build(&self, direction: Direction) -> Box<dyn StreamTransform> {
        match self {
            TransformConfig::None => Box::new(Passthrough),
            TransformConfig::Shift { offset } => match direction {
                Direction::Encode => Box::new(ByteShift::encoder(*offset)),
                Direction::Decode => Box::new(ByteShift::decoder(*offset)),
            },
            TransformConfig::Xor { key } => Box::new(RollingXor::new(key.as_bytes())),
        }
    }

    /// Wrap a connection so reads are decoded and writes encoded
    pub fn wrap<S>(&self, stream: S) -> TransformStream<S> {
        TransformStream::new(
            stream,
            self.build(Direction::Decode),
            self.build(Direction::Encode),
        )
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            TransformConfig::None => "none",
            TransformConfig::Shift { .. } => "shift",
            TransformConfig::Xor { .. } => "xor",
        }
    }
}
