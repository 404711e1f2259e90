//! Shoal - a Redis-compatible KV node with full-state snapshot
//! replication.
//!
//! The core of this crate is the replication streamer: it ships a
//! consistent snapshot of the store from a master node to a freshly
//! joined slave over TCP, with pipelined compression, explicit
//! backpressure against a slow slave, and keepalives toward the upstream
//! coordinator that scheduled the transfer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Upstream coordinator (RESP)                │
//! └──────────────────────────────────────────────────────────────┘
//!                │ rr_make_snapshot / rr_transfer_snapshot
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Dispatcher (server::Server)                  │
//! └──────────────────────────────────────────────────────────────┘
//!                │ snapshot handle moves into the job
//! ┌──────────────────────────────────────────────────────────────┐
//! │   Replication job:  cursor → staging → compress → frames     │
//! │   (repl::job drives iteration, one-slot pipeline, links)     │
//! └──────────────────────────────────────────────────────────────┘
//!                │ mset batch frames, then "complete"
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Slave node (TCP)                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core::config`] - configuration parsing and validation
//! - [`core::error`] - error taxonomy and terminal outcomes
//! - [`core::time`] - wall-clock and log formatting helpers
//! - [`storage`] - ordered KV store with immutable snapshots
//! - [`net`] - link abstraction and RESP reply encoding
//! - [`repl`] - the replication streamer itself
//! - [`server`] - coordinator-facing command loop
//!
//! # Key Invariants
//!
//! - Frames reach the slave link in exact iteration order; at most one
//!   compression task is ever in flight per job.
//! - The slave output buffer is bounded by three maximum packages plus
//!   one in-flight batch frame.
//! - Every job publishes its terminal outcome exactly once, on every
//!   path.

// Core infrastructure
pub mod core;

// Storage layer
pub mod storage;

// Networking
pub mod net;

// Snapshot replication
pub mod repl;

// Coordinator-facing dispatcher
pub mod server;

// Re-exports for convenience
pub use crate::core::config::Config;
pub use crate::core::error::{LinkSide, ShoalError, ShoalResult};
pub use repl::{JobOptions, ReplState, ReplicationJob};
pub use server::Server;
pub use storage::Store;
