//! Variable-length integer encoding and decoding.
//!
//! Protocol Buffers base-128 varints: 7 data bits per byte, the high bit set on
//! every byte except the last, least significant group first.
//!
//! Signed values in the default integer encoding are sign-extended to 64 bits
//! before being written, so any negative number occupies the full
//! [`MAX_VARINT_LEN`] bytes. Fields hinted `"protobuf:signed"` go through
//! [`zigzag`] instead, which keeps small negative numbers short.

use crate::{MalformedInput, Result};
use bytes::{Buf, BufMut};

/// Largest number of bytes a 64-bit varint can occupy.
pub const MAX_VARINT_LEN: usize = 10;

const DATA_BITS_PER_BYTE: u32 = 7;
const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// Writes `value` as a varint.
pub fn write(value: u64, buf: &mut impl BufMut) {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let len = encode_into(value, &mut scratch);
    buf.put_slice(&scratch[..len]);
}

/// Encodes `value` into `out`, returning the number of bytes used.
pub fn encode_into(value: u64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    if value < CONTINUATION_BIT_MASK as u64 {
        // Fast path for small values (the common case for lengths and tags).
        out[0] = value as u8;
        return 1;
    }

    let mut val = value;
    let mut len = 0;
    while val >= CONTINUATION_BIT_MASK as u64 {
        out[len] = (val as u8 & DATA_BITS_MASK) | CONTINUATION_BIT_MASK;
        val >>= DATA_BITS_PER_BYTE;
        len += 1;
    }
    out[len] = val as u8;
    len + 1
}

/// Decodes a varint from `buf`.
///
/// # Errors
/// [`MalformedInput::Truncated`] if the buffer ends before the terminating byte,
/// [`MalformedInput::VarintOverflow`] if the encoding carries more than 64 bits.
pub fn read(buf: &mut impl Buf) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(MalformedInput::Truncated.into());
        }
        let byte = buf.get_u8();

        // The tenth byte may only contribute the single remaining bit.
        if shift == 63 && byte > 1 {
            return Err(MalformedInput::VarintOverflow.into());
        }

        result |= u64::from(byte & DATA_BITS_MASK) << shift;
        if byte & CONTINUATION_BIT_MASK == 0 {
            return Ok(result);
        }
        shift += DATA_BITS_PER_BYTE;
    }
}

/// Number of bytes needed to encode `value` as a varint.
pub fn size(value: u64) -> usize {
    let data_bits = 64 - value.leading_zeros() as usize;
    usize::max(1, data_bits.div_ceil(DATA_BITS_PER_BYTE as usize))
}

/// Maps a signed integer onto an unsigned one so small magnitudes stay short:
/// `0, -1, 1, -2, ...` become `0, 1, 2, 3, ...`.
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag`].
pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
