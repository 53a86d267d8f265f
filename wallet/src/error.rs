use crate::{admission::AdmissionError, priority_lock::PriorityLockError};
use thiserror::Error;

/// Top-level error type for the sync engine, mirroring the disposition
/// table of spec.md §7. Validation failures never surface this to a
/// caller — they result in peer disconnection and a log entry (see
/// `reconciler` and `validator`); this type is for the handful of cases
/// spec.md says should be retriable or should abort a sync episode.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer misbehaved: {0}")]
    PeerMisbehavior(String),

    #[error("peer timed out waiting for a response")]
    PeerTimeout,

    #[error("peer runs unsupported protocol version")]
    OldSoftware,

    #[error(transparent)]
    QueueFull(#[from] PriorityLockError),

    #[error(transparent)]
    AdmissionFull(#[from] AdmissionError),

    #[error("wallet invariant breach during backtrack: {0}")]
    WalletInvariantBreach(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
