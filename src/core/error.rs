//! Error types and replication outcome taxonomy.
//!
//! Every replication job ends in exactly one of the terminal conditions
//! below. All of them are fatal to the job; retry policy lives above this
//! layer (the coordinator may ask the slave to restart the transfer).

use thiserror::Error;

/// Identifies which peer of a replication job a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    /// The upstream coordinator connection.
    Master,
    /// The freshly joined slave node.
    Slave,
}

impl std::fmt::Display for LinkSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Slave => write!(f, "slave"),
        }
    }
}

/// Common Shoal error conditions.
#[derive(Debug, Error)]
pub enum ShoalError {
    /// The preceding `rr_make_snapshot` step did not install a handle.
    #[error("no snapshot installed; rr_make_snapshot missing or failed")]
    NoSnapshot,

    /// Initial TCP connect to the slave node failed.
    #[error("failed to connect to slave node {peer}: {message}")]
    SlaveConnectFailed { peer: String, message: String },

    /// A link died mid-stream (read/write returned 0 or errored).
    #[error("{side} link broken")]
    LinkBroken { side: LinkSide },

    /// The readiness wait itself failed.
    #[error("poll failed: {message}")]
    PollFailed { message: String },

    /// The slave answered the terminal `complete` frame with a rejection,
    /// or not at all.
    #[error("slave rejected completion")]
    SlaveRejectedCompletion,

    /// A replication job is already running.
    #[error("replication already in progress")]
    ReplicationBusy,

    /// Malformed wire data from a peer.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Invalid request from the coordinator.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// I/O plumbing outside the link error model.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ShoalError {
    /// Create a Protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when a failing job should still send an error frame to the
    /// master link: every terminal failure except the master link itself
    /// breaking (there is nobody left to tell).
    pub fn reports_to_master(&self) -> bool {
        !matches!(
            self,
            Self::LinkBroken {
                side: LinkSide::Master
            }
        )
    }
}

/// Result type using ShoalError.
pub type ShoalResult<T> = Result<T, ShoalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_broken_master_link_suppresses_the_error_frame() {
        assert!(!ShoalError::LinkBroken {
            side: LinkSide::Master
        }
        .reports_to_master());

        assert!(ShoalError::LinkBroken {
            side: LinkSide::Slave
        }
        .reports_to_master());
        assert!(ShoalError::SlaveRejectedCompletion.reports_to_master());
        assert!(ShoalError::NoSnapshot.reports_to_master());
        assert!(ShoalError::PollFailed {
            message: "wait failed".to_string()
        }
        .reports_to_master());
    }

    #[test]
    fn display_includes_peer() {
        let err = ShoalError::SlaveConnectFailed {
            peer: "10.0.0.2:8889".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("10.0.0.2:8889"));
    }
}
