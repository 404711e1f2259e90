//! Length-prefixed wire framing for the replication stream.
//!
//! Strings are prefixed with a variable-width length:
//!
//! ```text
//! 00xxxxxx                      6-bit length, one byte
//! 01xxxxxx xxxxxxxx             14-bit length, big-endian
//! 10000000 + 4 bytes            32-bit length, big-endian
//! 10000001 + 8 bytes            64-bit length, big-endian
//! ```
//!
//! A batch frame is the `mset` token, the raw payload length, the
//! compressed length (0 = payload stored uncompressed), then the payload:
//! concatenated `(len, bytes)` pairs alternating key and value. The
//! decoder half of this module states the slave-side contract and backs
//! the round-trip tests; the streaming side only encodes.

use crate::core::error::{ShoalError, ShoalResult};
use bytes::BytesMut;

/// Command token opening every batch frame.
pub const MSET_TOKEN: &[u8] = b"mset";

/// Terminal token closing the stream.
pub const COMPLETE_TOKEN: &[u8] = b"complete";

/// Lengths below this use the precomputed prefix table.
pub const QUICKMAP_SIZE: usize = 256;

const LEN_32BIT: u8 = 0x80;
const LEN_64BIT: u8 = 0x81;

/// Precomputed length prefixes for strings shorter than `QUICKMAP_SIZE`.
/// Each entry is (encoded bytes, encoded width).
static QUICKMAP: [([u8; 2], u8); QUICKMAP_SIZE] = build_quickmap();

const fn build_quickmap() -> [([u8; 2], u8); QUICKMAP_SIZE] {
    let mut table = [([0u8; 2], 0u8); QUICKMAP_SIZE];
    let mut len = 0;
    while len < QUICKMAP_SIZE {
        if len < 64 {
            table[len] = ([len as u8, 0], 1);
        } else {
            table[len] = ([0x40 | ((len >> 8) as u8), (len & 0xff) as u8], 2);
        }
        len += 1;
    }
    table
}

/// Append the variable-width encoding of `n` to `dst`.
pub fn encode_len(dst: &mut BytesMut, n: u64) {
    if n < 64 {
        dst.extend_from_slice(&[n as u8]);
    } else if n < 16384 {
        dst.extend_from_slice(&[0x40 | (n >> 8) as u8, (n & 0xff) as u8]);
    } else if n <= u32::MAX as u64 {
        dst.extend_from_slice(&[LEN_32BIT]);
        dst.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        dst.extend_from_slice(&[LEN_64BIT]);
        dst.extend_from_slice(&n.to_be_bytes());
    }
}

/// Decode a length from the front of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some((n, width)))`
/// on success.
pub fn decode_len(data: &[u8]) -> ShoalResult<Option<(u64, usize)>> {
    let Some(&first) = data.first() else {
        return Ok(None);
    };
    match first >> 6 {
        0b00 => Ok(Some((first as u64, 1))),
        0b01 => {
            if data.len() < 2 {
                return Ok(None);
            }
            Ok(Some((((first as u64 & 0x3f) << 8) | data[1] as u64, 2)))
        }
        _ => match first {
            LEN_32BIT => {
                if data.len() < 5 {
                    return Ok(None);
                }
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&data[1..5]);
                Ok(Some((u32::from_be_bytes(raw) as u64, 5)))
            }
            LEN_64BIT => {
                if data.len() < 9 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&data[1..9]);
                Ok(Some((u64::from_be_bytes(raw), 9)))
            }
            other => Err(ShoalError::protocol(format!(
                "bad length prefix byte 0x{:02x}",
                other
            ))),
        },
    }
}

/// Append a length-prefixed string. Short strings take their prefix from
/// the quickmap; everything else goes through `encode_len`.
pub fn append_string(dst: &mut BytesMut, bytes: &[u8]) {
    if bytes.len() < QUICKMAP_SIZE {
        let (prefix, width) = QUICKMAP[bytes.len()];
        dst.extend_from_slice(&prefix[..width as usize]);
    } else {
        encode_len(dst, bytes.len() as u64);
    }
    dst.extend_from_slice(bytes);
}

/// Append a batch frame header: `mset` token, raw length, compressed
/// length.
pub fn append_batch_header(dst: &mut BytesMut, raw_len: u64, compressed_len: u64) {
    append_string(dst, MSET_TOKEN);
    encode_len(dst, raw_len);
    encode_len(dst, compressed_len);
}

/// Read one length-prefixed string from the front of `data`.
pub fn read_string(data: &[u8]) -> ShoalResult<Option<(&[u8], usize)>> {
    let Some((len, width)) = decode_len(data)? else {
        return Ok(None);
    };
    let len = len as usize;
    if data.len() < width + len {
        return Ok(None);
    }
    Ok(Some((&data[width..width + len], width + len)))
}

/// A decoded batch frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Byte size of the pair-encoded payload before compression.
    pub raw_len: u64,
    /// Compressed payload size; 0 means the payload is stored raw.
    pub compressed_len: u64,
    /// Payload as carried on the wire.
    pub payload: Vec<u8>,
}

impl Batch {
    /// Wire size of the payload: `compressed_len` unless the zero
    /// sentinel says the payload is raw.
    pub fn wire_len(&self) -> u64 {
        if self.compressed_len == 0 {
            self.raw_len
        } else {
            self.compressed_len
        }
    }
}

/// One frame of the replication stream, as the slave sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// A batch of key/value pairs.
    Batch(Batch),
    /// The terminal `complete` marker.
    Complete,
}

/// Decode one frame from the front of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
/// the bytes consumed.
pub fn decode_frame(data: &[u8]) -> ShoalResult<Option<(WireFrame, usize)>> {
    let Some((token, mut pos)) = read_string(data)? else {
        return Ok(None);
    };
    if token == COMPLETE_TOKEN {
        return Ok(Some((WireFrame::Complete, pos)));
    }
    if token != MSET_TOKEN {
        return Err(ShoalError::protocol(format!(
            "unexpected frame token {:?}",
            String::from_utf8_lossy(token)
        )));
    }

    let Some((raw_len, width)) = decode_len(&data[pos..])? else {
        return Ok(None);
    };
    pos += width;
    let Some((compressed_len, width)) = decode_len(&data[pos..])? else {
        return Ok(None);
    };
    pos += width;

    let body_len = if compressed_len == 0 {
        raw_len
    } else {
        compressed_len
    } as usize;
    if data.len() < pos + body_len {
        return Ok(None);
    }
    let payload = data[pos..pos + body_len].to_vec();
    Ok(Some((
        WireFrame::Batch(Batch {
            raw_len,
            compressed_len,
            payload,
        }),
        pos + body_len,
    )))
}

/// Split a raw (decompressed) payload into its key/value pairs.
pub fn decode_pairs(payload: &[u8]) -> ShoalResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut pairs = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        let Some((key, n)) = read_string(&payload[pos..])? else {
            return Err(ShoalError::protocol("truncated key in batch payload"));
        };
        let key = key.to_vec();
        pos += n;
        let Some((value, n)) = read_string(&payload[pos..])? else {
            return Err(ShoalError::protocol("truncated value in batch payload"));
        };
        pairs.push((key, value.to_vec()));
        pos += n;
    }
    Ok(pairs)
}
