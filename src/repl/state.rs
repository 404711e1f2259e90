//! Shared replication state.
//!
//! One process-wide record tracking the installed snapshot handle, job
//! liveness, and the last terminal outcome. The snapshot is installed by
//! `rr_make_snapshot`, moved out atomically when a job starts, and the
//! state keeps only liveness/outcome while the job runs. `finish` must be
//! called exactly once per job on every terminal path.

use crate::core::error::{ShoalError, ShoalResult};
use crate::storage::StoreSnapshot;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<StoreSnapshot>,
    in_progress: bool,
    last_result: Option<bool>,
}

/// Mutex-guarded replication state.
#[derive(Debug, Default)]
pub struct ReplState {
    inner: Mutex<Inner>,
}

impl ReplState {
    /// Create an empty state: no snapshot, no job, no outcome.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a snapshot handle for a subsequent transfer, replacing any
    /// previous one.
    pub fn install_snapshot(&self, snapshot: StoreSnapshot) {
        self.inner.lock().snapshot = Some(snapshot);
    }

    /// Discard the installed snapshot, if any.
    pub fn drop_snapshot(&self) {
        self.inner.lock().snapshot = None;
    }

    /// True when a snapshot is installed and ready to transfer.
    pub fn has_snapshot(&self) -> bool {
        self.inner.lock().snapshot.is_some()
    }

    /// Atomically claim the job slot and move the snapshot handle out.
    ///
    /// Fails with `ReplicationBusy` when a job is already running and
    /// `NoSnapshot` when `rr_make_snapshot` has not installed a handle.
    pub fn begin(&self) -> ShoalResult<StoreSnapshot> {
        let mut inner = self.inner.lock();
        if inner.in_progress {
            return Err(ShoalError::ReplicationBusy);
        }
        let snapshot = inner.snapshot.take().ok_or(ShoalError::NoSnapshot)?;
        inner.in_progress = true;
        inner.last_result = None;
        Ok(snapshot)
    }

    /// Publish the terminal outcome and release the job slot.
    pub fn finish(&self, success: bool) {
        let mut inner = self.inner.lock();
        inner.in_progress = false;
        inner.last_result = Some(success);
    }

    /// True while a job is running.
    pub fn is_in_progress(&self) -> bool {
        self.inner.lock().in_progress
    }

    /// Outcome of the last finished job, if any finished since the last
    /// `begin`.
    pub fn last_result(&self) -> Option<bool> {
        self.inner.lock().last_result
    }
}
