//! Unsigned LEB128 varints
//!
//! 7 bits per byte, least significant group first, high bit set on every
//! byte but the last. A u64 takes at most 10 bytes.

use std::io::{self, Read, Write};

/// Maximum encoded length of a u64
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` takes once encoded
#[inline]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Encode `value` into `buf`, returning the number of bytes written
#[inline]
pub fn encode_varint(mut value: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

/// Write `value` to `writer`, returning the number of bytes written
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, value: u64) -> io::Result<usize> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_varint(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Read one varint
///
/// Returns `Ok(None)` when the stream ends before or inside the varint: a
/// truncated tail is treated as end of data, not as a fatal error. A varint
/// longer than 10 bytes is reported as `InvalidData`.
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut value = 0u64;
    let mut byte = [0u8; 1];
    let mut i = 0;
    while i < MAX_VARINT_LEN {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
        value |= ((byte[0] & 0x7F) as u64) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
        i += 1;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint exceeds 10 bytes",
    ))
}

/// Decode a varint from the front of a slice, returning `(value, bytes_consumed)`
///
/// Returns `None` if the slice ends inside the varint or the varint is longer than 10 bytes.
#[inline]
pub fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &b) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= ((b & 0x7F) as u64) << (7 * i);
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
