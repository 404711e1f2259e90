//! Ordered KV store with immutable snapshots.
//!
//! The store keeps live data in an ordered map and produces point-in-time
//! snapshots by deep copy behind an `Arc`. A snapshot stays valid for as
//! long as any handle to it exists; concurrent writes to the live map never
//! perturb iteration over a snapshot. This is the storage contract the
//! replication streamer is written against.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Read options for snapshot iteration.
///
/// `fill_cache` and `readahead_bytes` are hints carried for parity with
/// block-based engines; a full-scan read should not pollute a block cache
/// and wants large readahead. The in-memory engine records them without
/// acting on them.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Do not populate the block cache with scanned data.
    pub fill_cache: bool,

    /// Readahead window for sequential scans.
    pub readahead_bytes: usize,

    /// The snapshot to iterate.
    pub snapshot: StoreSnapshot,
}

impl ReadOptions {
    /// Options for a full-snapshot scan: cache off, 4 MiB readahead.
    pub fn full_scan(snapshot: StoreSnapshot) -> Self {
        Self {
            fill_cache: false,
            readahead_bytes: 4 * 1024 * 1024,
            snapshot,
        }
    }
}

/// An immutable point-in-time view of the store.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    data: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl StoreSnapshot {
    /// Number of keys captured by this snapshot.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the snapshot captured no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Look up a key within the snapshot.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(|v| v.as_slice())
    }
}

/// Ordered forward cursor over a snapshot.
///
/// Positioned on the first key at construction. `entry()` yields the
/// current pair, `advance()` steps forward; once exhausted `entry()`
/// returns `None` permanently.
pub struct SnapshotCursor {
    data: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl SnapshotCursor {
    fn new(snapshot: &StoreSnapshot) -> Self {
        let data = Arc::clone(&snapshot.data);
        let current = data.iter().next().map(|(k, v)| (k.clone(), v.clone()));
        Self { data, current }
    }

    /// The pair under the cursor, or `None` once exhausted.
    pub fn entry(&self) -> Option<(&[u8], &[u8])> {
        self.current
            .as_ref()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Step to the next key in order.
    pub fn advance(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.current = self
            .data
            .range::<Vec<u8>, _>((Bound::Excluded(&key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
    }
}

/// The live KV store.
pub struct Store {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or overwrite a key.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.map.write().insert(key.into(), value.into());
    }

    /// Look up a key in the live map.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.read().get(key).cloned()
    }

    /// Remove a key. Returns true when the key existed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.map.write().remove(key).is_some()
    }

    /// Approximate total key count. May be stale by the time it is used;
    /// callers treat it as a progress estimate only.
    pub fn size(&self) -> u64 {
        self.map.read().len() as u64
    }

    /// Capture an immutable snapshot of the current contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            data: Arc::new(self.map.read().clone()),
        }
    }

    /// Open an ordered forward cursor over the snapshot in `opts`.
    pub fn new_iterator(opts: &ReadOptions) -> SnapshotCursor {
        SnapshotCursor::new(&opts.snapshot)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
