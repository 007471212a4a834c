//! Engine error types
//!
//! Manager- and target-level failures, one variant per user-visible
//! code. Filesystem errors pass through transparently.

use thiserror::Error;

use starsync_core::domain::{DomainError, TargetId};
use starsync_fs::FsError;

/// Errors raised by targets and the sync manager
#[derive(Debug, Error)]
pub enum SyncError {
    /// No registered target carries this id
    #[error("Target not found: {0}")]
    TargetNotFound(TargetId),

    /// A target with this id is already registered
    #[error("Target already registered: {0}")]
    TargetAlreadyExists(TargetId),

    /// A primary target is already installed
    #[error("A primary target already exists: {0}")]
    PrimaryTargetExists(TargetId),

    /// The operation requires a primary target
    #[error("No primary target registered")]
    NoPrimaryTarget,

    /// The change's source target is gone
    #[error("Source target not available: {0}")]
    SourceNotAvailable(TargetId),

    /// Conflict resolution requested with nothing pending
    #[error("No pending sync to resolve")]
    NoPendingSync,

    /// Another cycle owns the manager right now
    #[error("A sync cycle is already in progress")]
    SyncInProgress,

    /// Target or manager initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Applying a change batch to a destination failed
    #[error("Apply failed on {target}: {reason}")]
    ApplyFailed { target: TargetId, reason: String },

    /// The change detector could not be started
    #[error("Watch failed on {target}: {reason}")]
    WatchFailed { target: TargetId, reason: String },

    /// Illegal lifecycle transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState { from: String, to: String },

    /// Filesystem failure, passed through with its own code
    #[error(transparent)]
    Fs(#[from] FsError),
}

impl SyncError {
    /// Stable user-visible code for this error
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::TargetNotFound(_) => "TARGET_NOT_FOUND",
            SyncError::TargetAlreadyExists(_) => "TARGET_ALREADY_EXISTS",
            SyncError::PrimaryTargetExists(_) => "PRIMARY_TARGET_EXISTS",
            SyncError::NoPrimaryTarget => "NO_PRIMARY_TARGET",
            SyncError::SourceNotAvailable(_) => "SOURCE_NOT_AVAILABLE",
            SyncError::NoPendingSync => "NO_PENDING_SYNC",
            SyncError::SyncInProgress => "SYNC_IN_PROGRESS",
            SyncError::InitializationFailed(_) => "INITIALIZATION_FAILED",
            SyncError::ApplyFailed { .. } => "APPLY_FAILED",
            SyncError::WatchFailed { .. } => "WATCH_FAILED",
            SyncError::InvalidState { .. } => "INVALID_OPERATION",
            SyncError::Fs(inner) => inner.code(),
        }
    }
}

impl From<DomainError> for SyncError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidState { from, to } => SyncError::InvalidState { from, to },
            other => SyncError::InitializationFailed(other.to_string()),
        }
    }
}
