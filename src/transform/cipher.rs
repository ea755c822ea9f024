//! Built-in transforms
//!
//! None of these provide confidentiality. They obfuscate the byte stream and
//! hold the place where a real stream cipher would plug in.

use super::StreamTransform;

/// Leaves bytes untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl StreamTransform for Passthrough {
    fn apply(&mut self, _buf: &mut [u8]) {}
}

/// Adds a constant to every byte, modulo 256.
///
/// Stateless: each output byte depends only on its input byte.
#[derive(Debug, Clone, Copy)]
pub struct ByteShift {
    delta: u8,
}

impl ByteShift {
    pub fn encoder(offset: u8) -> Self {
        Self { delta: offset }
    }

    pub fn decoder(offset: u8) -> Self {
        Self {
            delta: offset.wrapping_neg(),
        }
    }
}

impl StreamTransform for ByteShift {
    fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = byte.wrapping_add(self.delta);
        }
    }
}

/// XOR against a repeating key.
///
/// Stateful: the key position carries over between calls, so encoder and
/// decoder must see the same byte sequence. XOR is its own inverse, so both
/// directions use the same type.
#[derive(Debug, Clone)]
pub struct RollingXor {
    key: Vec<u8>,
    position: usize,
}

impl RollingXor {
    pub fn new(key: &[u8]) -> Self {
        // an empty key degenerates to passthrough instead of dividing by zero
        let key = if key.is_empty() { vec![0] } else { key.to_vec() };
        Self { key, position: 0 }
    }
}

impl StreamTransform for RollingXor {
    fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte ^= self.key[self.position];
            self.position = (self.position + 1) % self.key.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_wraps() {
        let mut encoder = ByteShift::encoder(1);
        let mut decoder = ByteShift::decoder(1);

        let mut buf = [0xfe, 0xff, 0x00];
        encoder.apply(&mut buf);
        assert_eq!(buf, [0xff, 0x00, 0x01]);
        decoder.apply(&mut buf);
        assert_eq!(buf, [0xfe, 0xff, 0x00]);
    }

    #[test]
    fn test_shift_is_per_byte() {
        // the same input byte always maps to the same output byte
        let mut encoder = ByteShift::encoder(3);
        let mut buf = [7u8; 16];
        encoder.apply(&mut buf);
        assert!(buf.iter().all(|&b| b == 10));
    }

    #[test]
    fn test_xor_position_carries_across_calls() {
        let mut whole = RollingXor::new(b"abc");
        let mut split = RollingXor::new(b"abc");

        let mut a = *b"hello world";
        let mut b = *b"hello world";
        whole.apply(&mut a);
        split.apply(&mut b[..4]);
        split.apply(&mut b[4..]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_xor_empty_key_is_passthrough() {
        let mut xor = RollingXor::new(b"");
        let mut buf = *b"data";
        xor.apply(&mut buf);
        assert_eq!(&buf, b"data");
    }
}
