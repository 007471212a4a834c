//! Shared state machines, encoded as data
//!
//! Every component carries an explicit transition table; invalid
//! transitions raise a typed error and drive the component to its
//! error state. The tables below are the single source of truth for
//! the filesystem, target, and manager lifecycles.
//!
//! ```text
//!  FsLifecycle:   uninitialized → ready ⇄ locked, any → error, error → ready
//!  TargetState:   uninitialized → idle → collecting → syncing → idle
//!  ManagerState:  uninitialized → ready → syncing → {ready | conflict} → ready
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// TransitionTable
// ============================================================================

/// Data-encoded state machine validator
///
/// Holds the set of legal `(from, to)` edges for one component. The
/// same validator type is shared by every lifecycle in the engine.
#[derive(Debug, Clone, Copy)]
pub struct TransitionTable<S: 'static> {
    edges: &'static [(S, S)],
}

impl<S: Copy + PartialEq + fmt::Display> TransitionTable<S> {
    /// Creates a table from a static edge list
    pub const fn new(edges: &'static [(S, S)]) -> Self {
        Self { edges }
    }

    /// Returns true if `from → to` is a legal transition
    pub fn can(&self, from: S, to: S) -> bool {
        self.edges.iter().any(|(f, t)| *f == from && *t == to)
    }

    /// Validates a transition
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` naming both states when the
    /// edge is not in the table.
    pub fn check(&self, from: S, to: S) -> Result<(), DomainError> {
        if self.can(from, to) {
            Ok(())
        } else {
            Err(DomainError::InvalidState {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

// ============================================================================
// FsLifecycle
// ============================================================================

/// Lifecycle of one FileSystem surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsLifecycle {
    #[default]
    Uninitialized,
    Ready,
    Locked,
    Error,
}

impl fmt::Display for FsLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsLifecycle::Uninitialized => write!(f, "uninitialized"),
            FsLifecycle::Ready => write!(f, "ready"),
            FsLifecycle::Locked => write!(f, "locked"),
            FsLifecycle::Error => write!(f, "error"),
        }
    }
}

/// Legal transitions for a FileSystem surface
///
/// Error is terminal except through re-initialization.
pub const FS_TRANSITIONS: TransitionTable<FsLifecycle> = TransitionTable::new(&[
    (FsLifecycle::Uninitialized, FsLifecycle::Ready),
    (FsLifecycle::Ready, FsLifecycle::Locked),
    (FsLifecycle::Locked, FsLifecycle::Ready),
    (FsLifecycle::Uninitialized, FsLifecycle::Error),
    (FsLifecycle::Ready, FsLifecycle::Error),
    (FsLifecycle::Locked, FsLifecycle::Error),
    (FsLifecycle::Error, FsLifecycle::Ready),
]);

// ============================================================================
// TargetState
// ============================================================================

/// Lifecycle of one SyncTarget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    #[default]
    Uninitialized,
    Idle,
    Collecting,
    Syncing,
    Error,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Uninitialized => write!(f, "uninitialized"),
            TargetState::Idle => write!(f, "idle"),
            TargetState::Collecting => write!(f, "collecting"),
            TargetState::Syncing => write!(f, "syncing"),
            TargetState::Error => write!(f, "error"),
        }
    }
}

/// Legal transitions for a SyncTarget
///
/// `collecting → idle` covers a cycle that found nothing to sync;
/// `error → idle` is the re-initialize recovery path.
pub const TARGET_TRANSITIONS: TransitionTable<TargetState> = TransitionTable::new(&[
    (TargetState::Uninitialized, TargetState::Idle),
    (TargetState::Uninitialized, TargetState::Error),
    (TargetState::Idle, TargetState::Collecting),
    (TargetState::Collecting, TargetState::Syncing),
    (TargetState::Collecting, TargetState::Idle),
    (TargetState::Syncing, TargetState::Idle),
    (TargetState::Idle, TargetState::Error),
    (TargetState::Collecting, TargetState::Error),
    (TargetState::Syncing, TargetState::Error),
    (TargetState::Error, TargetState::Idle),
]);

// ============================================================================
// ManagerState
// ============================================================================

/// Lifecycle of the FileSyncManager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    #[default]
    Uninitialized,
    Ready,
    Syncing,
    Conflict,
    Error,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Uninitialized => write!(f, "uninitialized"),
            ManagerState::Ready => write!(f, "ready"),
            ManagerState::Syncing => write!(f, "syncing"),
            ManagerState::Conflict => write!(f, "conflict"),
            ManagerState::Error => write!(f, "error"),
        }
    }
}

/// Legal transitions for the manager
///
/// Dispose returns the manager to uninitialized from any admitted
/// state; error recovers only to ready.
pub const MANAGER_TRANSITIONS: TransitionTable<ManagerState> = TransitionTable::new(&[
    (ManagerState::Uninitialized, ManagerState::Ready),
    (ManagerState::Ready, ManagerState::Syncing),
    (ManagerState::Syncing, ManagerState::Ready),
    (ManagerState::Syncing, ManagerState::Conflict),
    (ManagerState::Conflict, ManagerState::Ready),
    (ManagerState::Ready, ManagerState::Error),
    (ManagerState::Syncing, ManagerState::Error),
    (ManagerState::Conflict, ManagerState::Error),
    (ManagerState::Error, ManagerState::Ready),
    (ManagerState::Ready, ManagerState::Uninitialized),
    (ManagerState::Syncing, ManagerState::Uninitialized),
    (ManagerState::Conflict, ManagerState::Uninitialized),
    (ManagerState::Error, ManagerState::Uninitialized),
]);

// ============================================================================
// Locking
// ============================================================================

/// How a surface lock admits writers
///
/// A `Sync` lock admits writes that are marked as sync operations and
/// refuses everything else; an `External` lock refuses all writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    External,
    Sync,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::External => write!(f, "external"),
            LockMode::Sync => write!(f, "sync"),
        }
    }
}

/// Snapshot of a surface's lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    /// Whether the lock is currently held
    pub locked: bool,
    /// When the lock was acquired (None when unlocked)
    pub acquired_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Auto-release timeout in milliseconds
    pub timeout_millis: u64,
    /// Caller-supplied reason for holding the lock
    pub reason: Option<String>,
    /// Admission mode of the current lock
    pub mode: Option<LockMode>,
}

impl LockState {
    /// Snapshot of an unlocked surface
    pub fn unlocked() -> Self {
        Self {
            locked: false,
            acquired_at: None,
            timeout_millis: 0,
            reason: None,
            mode: None,
        }
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::unlocked()
    }
}
