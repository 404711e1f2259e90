//! Snapshot iterator driver.
//!
//! Walks the snapshot cursor forward, packing length-prefixed key/value
//! pairs into the staging buffer until the package threshold is crossed,
//! then yields back to the event loop. Progress is logged every million
//! keys against a best-effort total (percentages above 100 % are possible
//! with concurrent writers outside the snapshot and are left as-is).

use crate::core::time::{elapsed_human, now_ms};
use crate::repl::frame;
use crate::repl::{ReplStats, PROGRESS_LOG_KEYS};
use crate::storage::SnapshotCursor;
use bytes::BytesMut;

/// Whether the driver stopped on a full batch or on exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterStep {
    /// Staging crossed the package threshold; more pairs remain.
    More,
    /// The snapshot is exhausted.
    Done,
}

/// Drives a snapshot cursor into the staging buffer.
pub struct IterDriver {
    cursor: SnapshotCursor,
    total_keys: u64,
    visited: u64,
    start_ms: u64,
}

impl IterDriver {
    /// Wrap a cursor. `total_keys` is the store's size estimate, used
    /// only for progress percentages.
    pub fn new(cursor: SnapshotCursor, total_keys: u64) -> Self {
        Self {
            cursor,
            total_keys: total_keys.max(1),
            visited: 0,
            start_ms: now_ms(),
        }
    }

    /// Keys visited so far.
    pub fn visited(&self) -> u64 {
        self.visited
    }

    /// Pack pairs into `staging` until it exceeds `package_size` or the
    /// cursor is exhausted.
    pub fn fill(&mut self, staging: &mut BytesMut, package_size: usize, stats: &ReplStats) -> IterStep {
        loop {
            let Some((key, value)) = self.cursor.entry() else {
                return IterStep::Done;
            };
            frame::append_string(staging, key);
            frame::append_string(staging, value);

            self.visited += 1;
            stats.add_visited(1);
            if self.visited % PROGRESS_LOG_KEYS == 0 {
                tracing::info!(
                    "[{:05.2}%] processed {} keys so far, elapsed {}",
                    100.0 * self.visited as f64 / self.total_keys as f64,
                    self.visited,
                    elapsed_human(now_ms().saturating_sub(self.start_ms)),
                );
            }

            self.cursor.advance();

            if staging.len() > package_size {
                return IterStep::More;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repl::frame::decode_pairs;
    use crate::storage::{ReadOptions, Store};

    fn driver_for(pairs: &[(&[u8], &[u8])]) -> IterDriver {
        let store = Store::new();
        for (k, v) in pairs {
            store.put(*k, *v);
        }
        let total = store.size();
        let opts = ReadOptions::full_scan(store.snapshot());
        IterDriver::new(Store::new_iterator(&opts), total)
    }

    #[test]
    fn small_snapshot_fits_one_batch() {
        let mut driver = driver_for(&[(b"a", b"1"), (b"b", b"22")]);
        let stats = ReplStats::default();
        let mut staging = BytesMut::new();

        assert_eq!(driver.fill(&mut staging, 1024, &stats), IterStep::Done);
        assert_eq!(driver.visited(), 2);
        assert_eq!(stats.visited_keys(), 2);
        assert_eq!(
            decode_pairs(&staging).unwrap(),
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"22".to_vec()),
            ]
        );
    }

    #[test]
    fn threshold_yields_between_batches() {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..100)
            .map(|i| (format!("key-{:03}", i).into_bytes(), vec![b'v'; 64]))
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = pairs
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let mut driver = driver_for(&borrowed);
        let stats = ReplStats::default();

        let mut batches = Vec::new();
        loop {
            let mut staging = BytesMut::new();
            let step = driver.fill(&mut staging, 512, &stats);
            if !staging.is_empty() {
                batches.push(staging);
            }
            if step == IterStep::Done {
                break;
            }
            // each full batch only just crosses the threshold
            assert!(batches.last().unwrap().len() > 512);
        }

        assert!(batches.len() > 1);
        assert_eq!(driver.visited(), 100);

        let mut all_pairs = Vec::new();
        for batch in &batches {
            all_pairs.extend(decode_pairs(batch).unwrap());
        }
        assert_eq!(all_pairs, pairs);
    }

    #[test]
    fn oversized_single_pair_forms_its_own_batch() {
        let value = vec![b'x'; 4096];
        let mut driver = driver_for(&[(b"big", value.as_slice())]);
        let stats = ReplStats::default();
        let mut staging = BytesMut::new();

        // the pair lands whole even though it alone exceeds the threshold
        let step = driver.fill(&mut staging, 512, &stats);
        assert_eq!(step, IterStep::More);
        let pairs = decode_pairs(&staging).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1, value);

        assert_eq!(driver.fill(&mut BytesMut::new(), 512, &stats), IterStep::Done);
    }

    #[test]
    fn empty_snapshot_is_done_immediately() {
        let mut driver = driver_for(&[]);
        let stats = ReplStats::default();
        let mut staging = BytesMut::new();
        assert_eq!(driver.fill(&mut staging, 512, &stats), IterStep::Done);
        assert!(staging.is_empty());
        assert_eq!(stats.visited_keys(), 0);
    }
}
