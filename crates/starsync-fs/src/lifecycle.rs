//! Shared surface lifecycle and lock plumbing
//!
//! Every adapter owns a [`SurfaceCore`]: the lifecycle state driven
//! through the shared transition table, the mode-aware lock, and the
//! last-operation marker reported in state snapshots. Adapters stay
//! free of state-machine logic.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::error;

use starsync_core::domain::{FsLifecycle, LockMode, FS_TRANSITIONS};

use crate::error::FsError;
use crate::filesystem::FsStateSnapshot;
use crate::lock::SurfaceLock;

#[derive(Debug)]
struct CoreInner {
    state: Mutex<FsLifecycle>,
    lock: SurfaceLock,
    last_operation: Mutex<Option<String>>,
}

/// Lifecycle + lock state shared by all adapters
///
/// Cheap to clone; clones observe the same surface.
#[derive(Debug, Clone)]
pub struct SurfaceCore {
    inner: Arc<CoreInner>,
}

impl SurfaceCore {
    /// Creates an uninitialized surface
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CoreInner {
                state: Mutex::new(FsLifecycle::Uninitialized),
                lock: SurfaceLock::new(),
                last_operation: Mutex::new(None),
            }),
        }
    }

    /// Records the name of the operation currently being served
    pub fn record(&self, operation: &str) {
        *self
            .inner
            .last_operation
            .lock()
            .expect("surface state poisoned") = Some(operation.to_string());
    }

    /// Current lifecycle state
    ///
    /// Reconciles an auto-released lock: a surface observed as locked
    /// whose lock has expired is folded back to ready.
    pub fn lifecycle(&self) -> FsLifecycle {
        let mut state = self.inner.state.lock().expect("surface state poisoned");
        if *state == FsLifecycle::Locked && !self.inner.lock.is_locked() {
            *state = FsLifecycle::Ready;
        }
        *state
    }

    /// Validates and applies a lifecycle transition
    ///
    /// An invalid transition drives the surface to error and surfaces
    /// as INVALID_OPERATION.
    pub fn transition(&self, to: FsLifecycle) -> Result<(), FsError> {
        let from = self.lifecycle();
        if let Err(err) = FS_TRANSITIONS.check(from, to) {
            error!(%from, %to, "Invalid surface transition, driving to error");
            *self.inner.state.lock().expect("surface state poisoned") = FsLifecycle::Error;
            return Err(FsError::InvalidOperation(err.to_string()));
        }
        *self.inner.state.lock().expect("surface state poisoned") = to;
        Ok(())
    }

    /// Transitions into ready (initialization or error recovery)
    pub fn mark_ready(&self) -> Result<(), FsError> {
        self.transition(FsLifecycle::Ready)
    }

    /// Ensures the surface can serve operations at all
    pub fn require_operational(&self) -> Result<(), FsError> {
        match self.lifecycle() {
            FsLifecycle::Ready | FsLifecycle::Locked => Ok(()),
            other => Err(FsError::InvalidOperation(format!(
                "surface is {other}, not operational"
            ))),
        }
    }

    /// Acquires the surface lock and enters the locked state
    ///
    /// # Errors
    /// - `LOCKED` if the lock is already held
    /// - `INVALID_OPERATION` if the surface is not ready (this drives
    ///   the surface to error, matching the transition table)
    pub fn lock(&self, timeout: Duration, reason: &str, mode: LockMode) -> Result<(), FsError> {
        self.inner.lock.acquire(timeout, reason, mode)?;
        if let Err(err) = self.transition(FsLifecycle::Locked) {
            self.inner.lock.release();
            return Err(err);
        }
        Ok(())
    }

    /// Releases the lock and leaves the locked state; idempotent
    pub fn force_unlock(&self) {
        self.inner.lock.release();
        let mut state = self.inner.state.lock().expect("surface state poisoned");
        if *state == FsLifecycle::Locked {
            *state = FsLifecycle::Ready;
        }
    }

    /// Write admission check: operational state plus lock mode
    pub fn check_write(&self, is_sync_op: bool) -> Result<(), FsError> {
        self.require_operational()?;
        self.inner.lock.check_write(is_sync_op)
    }

    /// Full state snapshot for `getState`
    pub fn snapshot(&self) -> FsStateSnapshot {
        FsStateSnapshot {
            lifecycle: self.lifecycle(),
            lock: self.inner.lock.state(),
            last_operation: self
                .inner
                .last_operation
                .lock()
                .expect("surface state poisoned")
                .clone(),
        }
    }
}

impl Default for SurfaceCore {
    fn default() -> Self {
        Self::new()
    }
}
