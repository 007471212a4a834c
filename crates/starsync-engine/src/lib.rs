//! Starsync engine - multi-target replication
//!
//! Provides:
//! - [`SyncTarget`]: one surface with lifecycle, sync-mode locking,
//!   and a debounced change detector
//! - [`FileSyncManager`]: one primary, N secondaries, ordered fan-out
//!   with per-target failure isolation, pending-conflict retention,
//!   bootstrap and reinitialize, and progress events

mod detector;
mod error;
mod manager;
mod pending;
mod progress;
mod target;

pub use error::SyncError;
pub use manager::{ApplyResult, FileSyncManager};
pub use pending::{PendingSync, PendingTargetSync};
pub use progress::{ListenerId, ProgressEvent, ProgressListener, SyncPhase};
pub use target::{ChangeCallback, SyncTarget, TargetRole, TargetStateSnapshot};
