//! Common test utilities.
//!
//! Shared helpers for integration tests: a scripted fake slave speaking
//! the replication wire protocol, and a master-link pair backed by a real
//! TCP connection. Import with `mod common;` in test files.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use shoal::net::link::{decode_cmd_frame, encode_cmd_frame, CmdFrameParse, Link};
use shoal::repl::compress::decompress;
use shoal::repl::frame::{decode_frame, decode_pairs, Batch, WireFrame};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Scripted behavior for the fake slave.
pub struct SlaveScript {
    /// Reply to the `ssdb_sync2` handshake; `None` closes the connection
    /// without replying.
    pub handshake_reply: Option<Vec<Vec<u8>>>,
    /// Reply to the terminal `complete` frame; `None` closes without an
    /// acknowledgement.
    pub ack: Option<Vec<Vec<u8>>>,
    /// Stop reading for the given duration once this many batches have
    /// been decoded.
    pub stall_after_batches: Option<(usize, Duration)>,
    /// Close the connection once this many batches have been decoded.
    pub drop_after_batches: Option<usize>,
}

impl SlaveScript {
    /// A well-behaved slave: acknowledges everything with "ok".
    pub fn acking() -> Self {
        Self {
            handshake_reply: Some(vec![b"ok".to_vec()]),
            ack: Some(vec![b"ok".to_vec()]),
            stall_after_batches: None,
            drop_after_batches: None,
        }
    }

    /// A slave that rejects the completion frame.
    pub fn rejecting() -> Self {
        Self {
            ack: Some(vec![b"failed".to_vec(), b"apply error".to_vec()]),
            ..Self::acking()
        }
    }

    /// A slave that stops reading mid-transfer.
    pub fn stalling(after_batches: usize, pause: Duration) -> Self {
        Self {
            stall_after_batches: Some((after_batches, pause)),
            ..Self::acking()
        }
    }

    /// A slave that drops the connection mid-transfer.
    pub fn dropping(after_batches: usize) -> Self {
        Self {
            drop_after_batches: Some(after_batches),
            ..Self::acking()
        }
    }
}

/// What the fake slave observed.
#[derive(Debug, Default)]
pub struct SlaveRecord {
    /// Fields of the handshake command frame.
    pub handshake: Vec<Vec<u8>>,
    /// Every decoded batch frame, in arrival order.
    pub batches: Vec<Batch>,
    /// Whether the terminal `complete` frame arrived.
    pub got_complete: bool,
}

impl SlaveRecord {
    /// All key/value pairs across batches, decompressed per the zero
    /// sentinel, in arrival order.
    pub fn pairs(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        for batch in &self.batches {
            let payload = if batch.compressed_len > 0 {
                decompress(&batch.payload, batch.raw_len as usize).expect("payload decompresses")
            } else {
                batch.payload.clone()
            };
            assert_eq!(payload.len() as u64, batch.raw_len);
            out.extend(decode_pairs(&payload).expect("payload decodes"));
        }
        out
    }
}

/// Bind a fake slave on an ephemeral port. Returns the port and a handle
/// resolving to everything the slave observed.
pub async fn spawn_fake_slave(script: SlaveScript) -> (u16, JoinHandle<SlaveRecord>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(run_fake_slave(listener, script));
    (port, handle)
}

async fn run_fake_slave(listener: TcpListener, script: SlaveScript) -> SlaveRecord {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    let mut record = SlaveRecord::default();

    // handshake frame
    loop {
        match decode_cmd_frame(&buf) {
            CmdFrameParse::Complete(fields, consumed) => {
                buf.advance(consumed);
                record.handshake = fields;
                break;
            }
            CmdFrameParse::Incomplete => {
                if stream.read_buf(&mut buf).await.unwrap() == 0 {
                    return record;
                }
            }
            CmdFrameParse::Invalid(message) => panic!("bad handshake frame: {}", message),
        }
    }

    let Some(reply) = &script.handshake_reply else {
        return record;
    };
    send_cmd_frame(&mut stream, reply).await;

    // batch stream until the terminal frame
    loop {
        match decode_frame(&buf).expect("well-formed stream") {
            Some((WireFrame::Batch(batch), consumed)) => {
                buf.advance(consumed);
                record.batches.push(batch);
                let count = record.batches.len();
                if script.drop_after_batches == Some(count) {
                    return record;
                }
                if let Some((after, pause)) = script.stall_after_batches {
                    if count == after {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
            Some((WireFrame::Complete, consumed)) => {
                buf.advance(consumed);
                record.got_complete = true;
                if let Some(ack) = &script.ack {
                    send_cmd_frame(&mut stream, ack).await;
                }
                return record;
            }
            None => {
                if stream.read_buf(&mut buf).await.unwrap() == 0 {
                    return record;
                }
            }
        }
    }
}

async fn send_cmd_frame(stream: &mut TcpStream, fields: &[Vec<u8>]) {
    let borrowed: Vec<&[u8]> = fields.iter().map(|f| f.as_slice()).collect();
    let mut out = BytesMut::new();
    encode_cmd_frame(&mut out, &borrowed);
    let _ = stream.write_all(&out).await;
}

/// A connected master link plus the coordinator's end of the socket.
pub async fn master_pair() -> (Link, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let coordinator = TcpStream::connect(addr).await.unwrap();
    let (stream, peer) = listener.accept().await.unwrap();
    (Link::new(stream, peer), coordinator)
}

/// Drain whatever the coordinator side received, until EOF or a short
/// idle timeout.
pub async fn read_master_bytes(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut chunk = [0u8; 4096];
        match tokio::time::timeout(Duration::from_millis(500), stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) => break,
        }
    }
    out
}

/// Read from the stream until `needle` shows up in the received bytes.
/// Panics after five seconds.
pub async fn expect_reply(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut got = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if contains(&got, needle) {
            return got;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "timed out waiting for {:?}; got {:?}",
                String::from_utf8_lossy(needle),
                String::from_utf8_lossy(&got)
            );
        }
        let mut chunk = [0u8; 4096];
        match tokio::time::timeout(Duration::from_millis(100), stream.read(&mut chunk)).await {
            Ok(Ok(0)) => panic!("peer closed while waiting for reply"),
            Ok(Ok(n)) => got.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => panic!("read failed: {}", e),
            Err(_) => {}
        }
    }
}

/// Substring search over received bytes.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Count non-overlapping occurrences of `needle`.
pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut pos = 0;
    while pos + needle.len() <= haystack.len() {
        if &haystack[pos..pos + needle.len()] == needle {
            count += 1;
            pos += needle.len();
        } else {
            pos += 1;
        }
    }
    count
}
