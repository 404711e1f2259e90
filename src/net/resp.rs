//! RESP2 encoding and a minimal command parser.
//!
//! The upstream coordinator speaks Redis protocol: commands arrive as
//! arrays of bulk strings and replies go out as status, error, integer,
//! bulk, or array frames. Only the subset the dispatcher and the
//! replication job need is implemented here.

use bytes::BytesMut;

/// Encode a simple status reply (`+msg\r\n`).
pub fn encode_status(dst: &mut BytesMut, msg: &str) {
    dst.extend_from_slice(b"+");
    dst.extend_from_slice(msg.as_bytes());
    dst.extend_from_slice(b"\r\n");
}

/// Encode an error reply (`-msg\r\n`).
pub fn encode_error(dst: &mut BytesMut, msg: &str) {
    dst.extend_from_slice(b"-");
    dst.extend_from_slice(msg.as_bytes());
    dst.extend_from_slice(b"\r\n");
}

/// Encode a bulk string reply (`$len\r\nbytes\r\n`).
pub fn encode_bulk(dst: &mut BytesMut, data: &[u8]) {
    dst.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

/// Encode a null bulk reply (`$-1\r\n`).
pub fn encode_null(dst: &mut BytesMut) {
    dst.extend_from_slice(b"$-1\r\n");
}

/// Encode an integer reply (`:n\r\n`).
pub fn encode_integer(dst: &mut BytesMut, n: i64) {
    dst.extend_from_slice(format!(":{}\r\n", n).as_bytes());
}

/// Encode an array of bulk strings.
pub fn encode_bulk_array(dst: &mut BytesMut, fields: &[&[u8]]) {
    dst.extend_from_slice(format!("*{}\r\n", fields.len()).as_bytes());
    for field in fields {
        encode_bulk(dst, field);
    }
}

/// Result of parsing a command frame from the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete command: its fields and the bytes consumed.
    Complete(Vec<Vec<u8>>, usize),
    /// More data is needed.
    Incomplete,
    /// The input is not a command frame.
    Invalid(String),
}

/// Parse one command from `data`: a RESP array of bulk strings, or an
/// inline command (space-separated line) as Redis accepts.
pub fn parse_command(data: &[u8]) -> ParseResult {
    if data.is_empty() {
        return ParseResult::Incomplete;
    }
    if data[0] == b'*' {
        parse_array(data)
    } else {
        parse_inline(data)
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn parse_decimal(data: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(data).ok()?;
    s.parse().ok()
}

fn parse_array(data: &[u8]) -> ParseResult {
    let Some(header_end) = find_crlf(&data[1..]) else {
        return ParseResult::Incomplete;
    };
    let Some(count) = parse_decimal(&data[1..1 + header_end]) else {
        return ParseResult::Invalid("bad array header".to_string());
    };
    if count < 0 {
        return ParseResult::Invalid("null command array".to_string());
    }

    let mut pos = 1 + header_end + 2;
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let rest = &data[pos..];
        if rest.is_empty() {
            return ParseResult::Incomplete;
        }
        if rest[0] != b'$' {
            return ParseResult::Invalid(format!("expected bulk string, got 0x{:02x}", rest[0]));
        }
        let Some(len_end) = find_crlf(&rest[1..]) else {
            return ParseResult::Incomplete;
        };
        let Some(len) = parse_decimal(&rest[1..1 + len_end]) else {
            return ParseResult::Invalid("bad bulk length".to_string());
        };
        if len < 0 {
            return ParseResult::Invalid("null bulk in command".to_string());
        }
        let body_start = 1 + len_end + 2;
        let body_end = body_start + len as usize;
        if rest.len() < body_end + 2 {
            return ParseResult::Incomplete;
        }
        fields.push(rest[body_start..body_end].to_vec());
        pos += body_end + 2;
    }
    ParseResult::Complete(fields, pos)
}

fn parse_inline(data: &[u8]) -> ParseResult {
    let Some(line_end) = find_crlf(data) else {
        return ParseResult::Incomplete;
    };
    let line = &data[..line_end];
    let fields: Vec<Vec<u8>> = line
        .split(|&b| b == b' ')
        .filter(|f| !f.is_empty())
        .map(|f| f.to_vec())
        .collect();
    if fields.is_empty() {
        return ParseResult::Invalid("empty inline command".to_string());
    }
    ParseResult::Complete(fields, line_end + 2)
}
