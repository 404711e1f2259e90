//! Full-state snapshot replication.
//!
//! Ships a consistent snapshot of the store from this node (the master of
//! the transfer) to a freshly joined slave over TCP, while keeping the
//! upstream coordinator link alive. The pieces:
//!
//! - [`frame`] - length-prefixed string and `mset` batch framing
//! - [`compress`] - the compressor stage with its zero-sentinel contract
//! - [`pipeline`] - one-slot async compression overlapping CPU and I/O
//! - [`cursor`] - packs snapshot pairs into the staging buffer
//! - [`job`] - the replication event loop and completion protocol
//! - [`state`] - shared liveness/outcome record

pub mod compress;
pub mod cursor;
pub mod frame;
pub mod job;
pub mod pipeline;
pub mod state;

use std::sync::atomic::{AtomicU64, Ordering};

/// Batch threshold when compression is enabled.
pub const MAX_PACKAGE_SIZE: usize = 512 * 1024;

/// Batch threshold when compression is disabled.
pub const MIN_PACKAGE_SIZE: usize = 64 * 1024;

/// Emit a progress log line every this many visited keys.
pub const PROGRESS_LOG_KEYS: u64 = 1_000_000;

pub use job::{JobOptions, ReplicationJob};
pub use state::ReplState;

/// Shared transfer counters, observable while a job runs.
#[derive(Debug, Default)]
pub struct ReplStats {
    /// Bytes of pair-encoded payload before compression.
    pub raw_bytes: AtomicU64,
    /// Bytes actually written to the slave link.
    pub sent_bytes: AtomicU64,
    /// Key/value pairs walked off the snapshot iterator.
    pub visited_keys: AtomicU64,
}

impl ReplStats {
    /// Record pair-encoded payload bytes.
    pub fn add_raw(&self, bytes: usize) {
        self.raw_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record bytes written to the slave link.
    pub fn add_sent(&self, bytes: usize) {
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record visited keys.
    pub fn add_visited(&self, keys: u64) {
        self.visited_keys.fetch_add(keys, Ordering::Relaxed);
    }

    /// Raw payload bytes so far.
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes.load(Ordering::Relaxed)
    }

    /// Bytes sent to the slave so far.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }

    /// Keys visited so far.
    pub fn visited_keys(&self) -> u64 {
        self.visited_keys.load(Ordering::Relaxed)
    }
}
