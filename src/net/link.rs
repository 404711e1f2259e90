//! TCP link abstraction for the replication job and the dispatcher.
//!
//! A `Link` owns a stream plus an output byte buffer and an error flag.
//! The replication event loop drives it in non-blocking mode through
//! `ready()`/`try_read()`/`try_write()`; the handshake and completion
//! exchanges use the blocking-mode helpers built on `write_all`. Closing
//! is by drop; there are no manual teardown paths.
//!
//! Command frames (the `ssdb_sync2` handshake and the slave's
//! acknowledgements) use the length-line wire format: every field is
//! `<decimal len>\n<bytes>\n`, and an empty line terminates the frame.

use crate::core::error::{ShoalError, ShoalResult};
use crate::net::resp;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest, Ready};
use tokio::net::TcpStream;

/// Read chunk size for non-blocking reads.
const READ_CHUNK: usize = 16 * 1024;

/// A TCP link with buffered output and sticky error state.
#[derive(Debug)]
pub struct Link {
    stream: TcpStream,
    /// Pending outbound bytes, consumed from the front as writes land.
    pub output: BytesMut,
    input: BytesMut,
    error: bool,
    /// Whether the peer asked for append-replies (`check 0`) alongside
    /// keepalives.
    pub append_reply: bool,
    peer: SocketAddr,
}

impl Link {
    /// Wrap an accepted stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            output: BytesMut::with_capacity(64 * 1024),
            input: BytesMut::with_capacity(16 * 1024),
            error: false,
            append_reply: false,
            peer,
        }
    }

    /// Connect to a peer.
    pub async fn connect(host: &str, port: u16) -> ShoalResult<Self> {
        let peer = format!("{}:{}", host, port);
        let stream =
            TcpStream::connect(&peer)
                .await
                .map_err(|e| ShoalError::SlaveConnectFailed {
                    peer: peer.clone(),
                    message: e.to_string(),
                })?;
        let _ = stream.set_nodelay(true);
        let addr = stream.peer_addr().map_err(ShoalError::Io)?;
        Ok(Self::new(stream, addr))
    }

    /// Remote address of this link.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sticky error flag; set by any failed read or write.
    pub fn error(&self) -> bool {
        self.error
    }

    /// Wait until the stream is ready for `interest`.
    pub async fn ready(&self, interest: Interest) -> std::io::Result<Ready> {
        self.stream.ready(interest).await
    }

    /// Buffered inbound bytes.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Drop `n` bytes from the front of the input buffer.
    pub fn consume_input(&mut self, n: usize) {
        self.input.advance(n);
    }

    /// Non-blocking read into the input buffer.
    ///
    /// Returns the bytes read; 0 covers both would-block and terminal
    /// conditions, with the latter also setting the error flag.
    pub fn try_read(&mut self) -> usize {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.try_read(&mut chunk) {
            Ok(0) => {
                self.error = true;
                0
            }
            Ok(n) => {
                self.input.extend_from_slice(&chunk[..n]);
                n
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
            Err(_) => {
                self.error = true;
                0
            }
        }
    }

    /// Non-blocking write from the front of the output buffer, repeated
    /// until the buffer drains or the socket stops accepting.
    ///
    /// Returns the bytes written; terminal write failures set the error
    /// flag.
    pub fn try_write(&mut self) -> usize {
        let mut written = 0;
        while !self.output.is_empty() {
            match self.stream.try_write(&self.output) {
                Ok(0) => {
                    self.error = true;
                    break;
                }
                Ok(n) => {
                    self.output.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.error = true;
                    break;
                }
            }
        }
        written
    }

    /// Blocking-mode flush of the whole output buffer.
    pub async fn flush(&mut self) -> ShoalResult<usize> {
        if self.output.is_empty() {
            return Ok(0);
        }
        let n = self.output.len();
        let result = self.stream.write_all(&self.output).await;
        if result.is_err() {
            self.error = true;
        }
        result?;
        self.output.clear();
        Ok(n)
    }

    /// Append a command frame (length-line format) to the output buffer.
    pub fn append_cmd(&mut self, fields: &[&[u8]]) {
        for field in fields {
            self.output
                .extend_from_slice(format!("{}\n", field.len()).as_bytes());
            self.output.extend_from_slice(field);
            self.output.extend_from_slice(b"\n");
        }
        self.output.extend_from_slice(b"\n");
    }

    /// Blocking-mode send of a command frame.
    pub async fn send_cmd(&mut self, fields: &[&[u8]]) -> ShoalResult<()> {
        self.append_cmd(fields);
        self.flush().await?;
        Ok(())
    }

    /// Blocking-mode read of one command frame.
    ///
    /// Returns `None` when the peer closes before a complete frame
    /// arrives.
    pub async fn read_reply(&mut self) -> ShoalResult<Option<Vec<Vec<u8>>>> {
        loop {
            match decode_cmd_frame(&self.input) {
                CmdFrameParse::Complete(fields, consumed) => {
                    self.input.advance(consumed);
                    return Ok(Some(fields));
                }
                CmdFrameParse::Invalid(message) => {
                    self.error = true;
                    return Err(ShoalError::Protocol { message });
                }
                CmdFrameParse::Incomplete => {}
            }
            let n = self.stream.read_buf(&mut self.input).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }

    /// Read more bytes into the input buffer, waiting for the peer.
    ///
    /// Returns the bytes read; 0 means the peer closed.
    pub async fn fill_input(&mut self) -> ShoalResult<usize> {
        let n = self.stream.read_buf(&mut self.input).await?;
        Ok(n)
    }

    /// Best-effort blocking send of a RESP array, for the final master
    /// acknowledgement.
    pub async fn quick_send(&mut self, fields: &[&[u8]]) -> ShoalResult<()> {
        resp::encode_bulk_array(&mut self.output, fields);
        self.flush().await?;
        Ok(())
    }
}

/// Parse outcome for a length-line command frame.
#[derive(Debug)]
pub enum CmdFrameParse {
    /// A complete frame: its fields and the bytes consumed.
    Complete(Vec<Vec<u8>>, usize),
    /// More data is needed.
    Incomplete,
    /// The input is not a command frame.
    Invalid(String),
}

/// Decode a length-line command frame from the front of `data`.
pub fn decode_cmd_frame(data: &[u8]) -> CmdFrameParse {
    let mut pos = 0;
    let mut fields = Vec::new();
    loop {
        let rest = &data[pos..];
        let Some(line_end) = rest.iter().position(|&b| b == b'\n') else {
            return CmdFrameParse::Incomplete;
        };
        let line = &rest[..line_end];
        // frame terminator: an empty length line (possibly \r\n)
        if line.is_empty() || line == b"\r" {
            if fields.is_empty() {
                return CmdFrameParse::Invalid("empty frame".to_string());
            }
            return CmdFrameParse::Complete(fields, pos + line_end + 1);
        }
        let len_str = match std::str::from_utf8(line) {
            Ok(s) => s.trim_end_matches('\r'),
            Err(_) => return CmdFrameParse::Invalid("non-utf8 length line".to_string()),
        };
        let Ok(len) = len_str.parse::<usize>() else {
            return CmdFrameParse::Invalid(format!("bad length line: {:?}", len_str));
        };
        let body_start = pos + line_end + 1;
        if data.len() < body_start + len + 1 {
            return CmdFrameParse::Incomplete;
        }
        fields.push(data[body_start..body_start + len].to_vec());
        // skip the trailing newline after the body
        pos = body_start + len + 1;
    }
}

/// Encode a command frame without a `Link`, for tests and fake peers.
pub fn encode_cmd_frame(dst: &mut BytesMut, fields: &[&[u8]]) {
    for field in fields {
        dst.extend_from_slice(format!("{}\n", field.len()).as_bytes());
        dst.extend_from_slice(field);
        dst.extend_from_slice(b"\n");
    }
    dst.extend_from_slice(b"\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_frame_round_trip() {
        let mut buf = BytesMut::new();
        let fields: Vec<&[u8]> = vec![b"ssdb_sync2", b"replts", b"42", b"heartbeat", b"1"];
        encode_cmd_frame(&mut buf, &fields);
        match decode_cmd_frame(&buf) {
            CmdFrameParse::Complete(fields, consumed) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(fields.len(), 5);
                assert_eq!(fields[0], b"ssdb_sync2");
                assert_eq!(fields[2], b"42");
            }
            _ => panic!("expected complete frame"),
        }
    }

    #[test]
    fn cmd_frame_partial_is_incomplete() {
        let mut buf = BytesMut::new();
        encode_cmd_frame(&mut buf, &[b"ok".as_slice()]);
        for cut in 0..buf.len() {
            assert!(matches!(
                decode_cmd_frame(&buf[..cut]),
                CmdFrameParse::Incomplete
            ));
        }
    }

    #[test]
    fn cmd_frame_with_empty_field() {
        let mut buf = BytesMut::new();
        encode_cmd_frame(&mut buf, &[b"ok".as_slice(), b"".as_slice()]);
        match decode_cmd_frame(&buf) {
            CmdFrameParse::Complete(fields, _) => {
                assert_eq!(fields, vec![b"ok".to_vec(), Vec::new()]);
            }
            _ => panic!("expected complete frame"),
        }
    }

    #[test]
    fn cmd_frame_rejects_garbage_length() {
        assert!(matches!(
            decode_cmd_frame(b"xyz\ndata\n\n"),
            CmdFrameParse::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn link_connect_failure_maps_to_slave_connect() {
        // port 1 is essentially never listening
        let err = Link::connect("127.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, ShoalError::SlaveConnectFailed { .. }));
    }
}
