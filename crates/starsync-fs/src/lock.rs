//! Mode-aware exclusive surface lock
//!
//! A surface can be locked in one of two modes:
//! - `external`: all writers are refused
//! - `sync`: writes marked as sync operations are admitted, everything
//!   else is refused
//!
//! The lock is re-entrancy-free (a second acquire fails with LOCKED)
//! and auto-releases after its timeout. A generation counter ensures
//! an expired timer never releases a lock acquired later.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use starsync_core::domain::{LockMode, LockState};

use crate::error::FsError;

#[derive(Debug)]
struct HeldLock {
    mode: LockMode,
    reason: String,
    acquired_at: DateTime<Utc>,
    timeout: Duration,
    generation: u64,
}

#[derive(Debug, Default)]
struct LockInner {
    current: Option<HeldLock>,
    generation: u64,
}

/// Exclusive lock guarding one surface's writers
///
/// Cheap to clone; clones share the same lock.
#[derive(Debug, Clone, Default)]
pub struct SurfaceLock {
    inner: Arc<Mutex<LockInner>>,
}

impl SurfaceLock {
    /// Creates an unlocked surface lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, scheduling auto-release after `timeout`
    ///
    /// # Errors
    /// Fails with `FsError::Locked` if the lock is already held.
    ///
    /// Must be called from within a tokio runtime (the auto-release
    /// timer is a spawned task).
    pub fn acquire(
        &self,
        timeout: Duration,
        reason: &str,
        mode: LockMode,
    ) -> Result<(), FsError> {
        let generation;
        {
            let mut inner = self.inner.lock().expect("surface lock poisoned");
            if let Some(held) = &inner.current {
                return Err(FsError::Locked(format!(
                    "already locked in {} mode: {}",
                    held.mode, held.reason
                )));
            }
            inner.generation += 1;
            generation = inner.generation;
            inner.current = Some(HeldLock {
                mode,
                reason: reason.to_string(),
                acquired_at: Utc::now(),
                timeout,
                generation,
            });
        }

        debug!(%mode, reason, timeout_ms = timeout.as_millis() as u64, "Surface lock acquired");

        // Auto-release: a stuck sync is worse than a transient write race.
        let lock = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if lock.release_generation(generation) {
                warn!(generation, "Surface lock auto-released after timeout");
            }
        });

        Ok(())
    }

    /// Releases the lock unconditionally; idempotent
    pub fn release(&self) {
        let mut inner = self.inner.lock().expect("surface lock poisoned");
        if inner.current.take().is_some() {
            debug!("Surface lock released");
        }
    }

    /// Releases only if the held lock matches `generation`
    ///
    /// Returns true if a release happened.
    fn release_generation(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock().expect("surface lock poisoned");
        match &inner.current {
            Some(held) if held.generation == generation => {
                inner.current = None;
                true
            }
            _ => false,
        }
    }

    /// Checks whether a write may proceed
    ///
    /// # Errors
    /// Fails with `FsError::Locked` when the lock is held in external
    /// mode, or held in sync mode and the caller is not sync-marked.
    pub fn check_write(&self, is_sync_op: bool) -> Result<(), FsError> {
        let inner = self.inner.lock().expect("surface lock poisoned");
        match &inner.current {
            None => Ok(()),
            Some(held) => match held.mode {
                LockMode::Sync if is_sync_op => Ok(()),
                _ => Err(FsError::Locked(format!(
                    "locked in {} mode: {}",
                    held.mode, held.reason
                ))),
            },
        }
    }

    /// Returns true if the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.inner
            .lock()
            .expect("surface lock poisoned")
            .current
            .is_some()
    }

    /// Snapshot of the current lock state
    pub fn state(&self) -> LockState {
        let inner = self.inner.lock().expect("surface lock poisoned");
        match &inner.current {
            None => LockState::unlocked(),
            Some(held) => LockState {
                locked: true,
                acquired_at: Some(held.acquired_at),
                timeout_millis: held.timeout.as_millis() as u64,
                reason: Some(held.reason.clone()),
                mode: Some(held.mode),
            },
        }
    }
}
