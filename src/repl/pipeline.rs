//! One-slot overlapped compression pipeline.
//!
//! Two staging buffers and at most one in-flight compression task. The
//! loop fills `staging`; `submit` hands it to a blocking-pool worker and
//! swaps in the spare buffer so iteration continues while the worker runs.
//! `drain` rendezvouses with the worker, frames its result, and recovers
//! the buffer as the new spare. Frames land in the destination in exactly
//! submit order because there is never more than one task in flight.
//!
//! With compression disabled, `submit` degrades to a synchronous frame
//! append and `drain` is a no-op.

use crate::core::error::{ShoalError, ShoalResult};
use crate::repl::compress::{self, CompressResult};
use bytes::BytesMut;
use tokio::task::JoinHandle;

/// The async compression pipeline.
pub struct CompressPipeline {
    staging: BytesMut,
    spare: BytesMut,
    pending: Option<JoinHandle<CompressResult>>,
    enabled: bool,
}

impl CompressPipeline {
    /// Create a pipeline; `enabled` mirrors the job's compress flag.
    pub fn new(enabled: bool) -> Self {
        Self {
            staging: BytesMut::new(),
            spare: BytesMut::new(),
            pending: None,
            enabled,
        }
    }

    /// The buffer the iterator driver packs into.
    pub fn staging(&mut self) -> &mut BytesMut {
        &mut self.staging
    }

    /// Bytes currently staged.
    pub fn staging_len(&self) -> usize {
        self.staging.len()
    }

    /// True when nothing is staged.
    pub fn staging_is_empty(&self) -> bool {
        self.staging.is_empty()
    }

    /// True while a compression task is in flight.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Dispatch the staged batch.
    ///
    /// Preconditions: no task pending, staging nonempty. With compression
    /// enabled this swaps buffers and starts a background compression;
    /// disabled, it frames the batch synchronously into `dst`.
    pub fn submit(&mut self, dst: &mut BytesMut) -> ShoalResult<()> {
        if self.staging.is_empty() {
            return Err(ShoalError::internal("submit on empty staging buffer"));
        }
        if !self.enabled {
            let buf = std::mem::take(&mut self.staging);
            self.staging = compress::frame_sync(dst, buf, false);
            return Ok(());
        }
        if self.pending.is_some() {
            return Err(ShoalError::internal("compression already in flight"));
        }
        let buf = std::mem::replace(&mut self.staging, std::mem::take(&mut self.spare));
        self.pending = Some(tokio::task::spawn_blocking(move || compress::compress(buf)));
        Ok(())
    }

    /// Rendezvous with the in-flight task, if any, and frame its result
    /// into `dst`. No-op when nothing is pending.
    pub async fn drain(&mut self, dst: &mut BytesMut) -> ShoalResult<()> {
        if let Some(handle) = self.pending.take() {
            let result = handle
                .await
                .map_err(|e| ShoalError::internal(format!("compression worker died: {}", e)))?;
            self.spare = compress::frame_result(dst, result);
        }
        Ok(())
    }

    /// Drain the pending task, then synchronously frame any residual
    /// staged bytes.
    pub async fn flush(&mut self, dst: &mut BytesMut) -> ShoalResult<()> {
        self.drain(dst).await?;
        if !self.staging.is_empty() {
            let buf = std::mem::take(&mut self.staging);
            self.staging = compress::frame_sync(dst, buf, self.enabled);
        }
        Ok(())
    }
}
