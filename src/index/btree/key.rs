use byteorder::{ByteOrder, LittleEndian};

/// A fixed-width, totally ordered index key.
///
/// The tree stores keys as raw little-endian bytes inside leaf and internal
/// pages, so every key type declares its encoded width up front and the
/// tree is monomorphized per key type, the way the engine instantiates its
/// index over 4..64-byte generic keys.
pub trait IndexKey: Copy + Ord + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Encoded width in bytes.
    const ENCODED_SIZE: usize;

    /// Write the key into `buf` (exactly `ENCODED_SIZE` bytes).
    fn encode_into(&self, buf: &mut [u8]);

    /// Read a key back out of `buf`.
    fn decode_from(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

/// Opaque fixed-width key, compared as a big-endian-style byte string.
/// The usual instantiations are N = 4, 8, 16, 32 and 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedKey<const N: usize>(pub [u8; N]);

impl<const N: usize> Default for FixedKey<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> FixedKey<N> {
    /// Build a key from an integer, padded big-endian so that integer
    /// order matches byte order.
    pub fn from_integer(value: u64) -> Self {
        let mut bytes = [0u8; N];
        let be = value.to_be_bytes();
        let take = be.len().min(N);
        bytes[N - take..].copy_from_slice(&be[be.len() - take..]);
        Self(bytes)
    }
}

impl<const N: usize> IndexKey for FixedKey<N> {
    const ENCODED_SIZE: usize = N;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.0);
    }

    fn decode_from(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        Self(bytes)
    }
}
