//! The compressor stage.
//!
//! `compress` consumes a filled staging buffer and produces a
//! [`CompressResult`] carrying the raw length, the compressed length, and
//! the compressed bytes. A compressed length of zero is the wire sentinel
//! for "stored uncompressed": the slave's decoder never has to probe the
//! payload to know whether to decompress.
//!
//! The codec is selected at compile time: the `snappy` feature (default)
//! uses the snappy raw format; `lz4-block` uses the lz4 block codec. The
//! block codec is given an output budget equal to the input size so an
//! expansion is reported as "incompressible" rather than emitted; inputs
//! under 100 bytes get the budget widened to 1024 to keep tiny payloads
//! from failing on codec overhead alone.

use crate::core::error::{ShoalError, ShoalResult};
use crate::repl::frame;
use bytes::BytesMut;

#[cfg(not(any(feature = "snappy", feature = "lz4-block")))]
compile_error!("enable one of the `snappy` or `lz4-block` features");

/// Outcome of one compressor run.
#[derive(Debug)]
pub struct CompressResult {
    /// The input buffer; cleared when compression succeeded, intact when
    /// the batch must be framed raw.
    pub input: BytesMut,
    /// Input size in bytes.
    pub raw_len: usize,
    /// Compressed size; 0 means frame the input uncompressed.
    pub compressed_len: usize,
    /// Compressed bytes, empty when `compressed_len` is 0.
    pub output: Vec<u8>,
}

/// Run the configured codec over `input`.
pub fn compress(mut input: BytesMut) -> CompressResult {
    let raw_len = input.len();
    match compress_block(&input) {
        Some(output) if !output.is_empty() => {
            let compressed_len = output.len();
            input.clear();
            CompressResult {
                input,
                raw_len,
                compressed_len,
                output,
            }
        }
        _ => CompressResult {
            input,
            raw_len,
            compressed_len: 0,
            output: Vec::new(),
        },
    }
}

/// Frame a compressor result as an `mset` batch into `dst`, clearing and
/// handing back the input buffer.
pub fn frame_result(dst: &mut BytesMut, mut result: CompressResult) -> BytesMut {
    frame::append_batch_header(dst, result.raw_len as u64, result.compressed_len as u64);
    if result.compressed_len == 0 {
        dst.extend_from_slice(&result.input);
        result.input.clear();
    } else {
        dst.extend_from_slice(&result.output);
    }
    result.input
}

/// Synchronous compress-and-frame of `input` into `dst`; the cleared
/// buffer comes back for reuse. With compression disabled the batch is
/// framed raw with the zero sentinel.
pub fn frame_sync(dst: &mut BytesMut, mut input: BytesMut, compress_enabled: bool) -> BytesMut {
    if !compress_enabled {
        frame::append_batch_header(dst, input.len() as u64, 0);
        dst.extend_from_slice(&input);
        input.clear();
        return input;
    }
    frame_result(dst, compress(input))
}

/// Invert the codec for a payload whose batch header carried a nonzero
/// compressed length.
pub fn decompress(data: &[u8], raw_len: usize) -> ShoalResult<Vec<u8>> {
    decompress_block(data, raw_len)
}

#[cfg(feature = "snappy")]
fn compress_block(input: &[u8]) -> Option<Vec<u8>> {
    snap::raw::Encoder::new().compress_vec(input).ok()
}

#[cfg(feature = "snappy")]
fn decompress_block(data: &[u8], _raw_len: usize) -> ShoalResult<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|e| ShoalError::protocol(format!("snappy decompress failed: {}", e)))
}

#[cfg(all(feature = "lz4-block", not(feature = "snappy")))]
fn compress_block(input: &[u8]) -> Option<Vec<u8>> {
    let mut budget = input.len();
    if budget < 100 {
        budget = 1024;
    }
    let mut output = vec![0u8; budget];
    match lz4::block::compress_to_buffer(input, None, false, &mut output) {
        Ok(n) if n > 0 => {
            output.truncate(n);
            Some(output)
        }
        _ => None,
    }
}

#[cfg(all(feature = "lz4-block", not(feature = "snappy")))]
fn decompress_block(data: &[u8], raw_len: usize) -> ShoalResult<Vec<u8>> {
    lz4::block::decompress(data, Some(raw_len as i32))
        .map_err(|e| ShoalError::protocol(format!("lz4 decompress failed: {}", e)))
}
