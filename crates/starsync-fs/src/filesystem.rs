//! The FileSystem capability trait
//!
//! A FileSystem owns a rooted tree over some substrate. Sync targets
//! consume this interface exclusively; nothing above the adapter layer
//! ever touches a native path.
//!
//! ## Write admission
//!
//! Every mutating operation carries an `is_sync_op` marker. A surface
//! locked in `sync` mode admits sync-marked writes only; a surface
//! locked in `external` mode admits none. The marker is the single bit
//! that distinguishes the engine's own writes from user writes while a
//! fan-out holds the lock.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use starsync_core::domain::{
    FileMetadata, FileSystemItem, FsLifecycle, LockMode, LockState, SyncPath,
};

use crate::error::FsError;
use crate::stream::FileContentStream;

/// Default content chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// The substrate backing a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstrateKind {
    /// Native host directory
    Native,
    /// In-process tree (sandbox and browser-store stand-in)
    Memory,
}

impl fmt::Display for SubstrateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubstrateKind::Native => write!(f, "native"),
            SubstrateKind::Memory => write!(f, "memory"),
        }
    }
}

/// Snapshot returned by [`FileSystem::state`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStateSnapshot {
    /// Current lifecycle state
    pub lifecycle: FsLifecycle,
    /// Current lock state
    pub lock: LockState,
    /// Name of the last operation served, if any
    pub last_operation: Option<String>,
}

/// Capability contract over an arbitrary file tree
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// The substrate this adapter runs on
    fn kind(&self) -> SubstrateKind;

    /// Brings the surface from uninitialized (or error) to ready
    async fn initialize(&self) -> Result<(), FsError>;

    /// Reads the full contents of a file
    ///
    /// # Errors
    /// `NOT_FOUND` if absent, `INVALID_TYPE` for a directory.
    async fn read_file(&self, path: &SyncPath) -> Result<Vec<u8>, FsError>;

    /// Writes a file, replacing existing content
    ///
    /// The parent directory must already exist (`NOT_FOUND` otherwise).
    /// Subject to lock admission via `is_sync_op`.
    async fn write_file(&self, path: &SyncPath, data: &[u8], is_sync_op: bool)
        -> Result<(), FsError>;

    /// Returns whether the path exists
    async fn exists(&self, path: &SyncPath) -> Result<bool, FsError>;

    /// Creates a directory
    ///
    /// Non-recursive: `ALREADY_EXISTS` if present, `NOT_FOUND` if the
    /// parent is missing. Recursive: succeeds silently if present and
    /// creates missing parents.
    async fn create_directory(
        &self,
        path: &SyncPath,
        recursive: bool,
        is_sync_op: bool,
    ) -> Result<(), FsError>;

    /// Deletes a file or directory
    ///
    /// `NOT_FOUND` if absent. A non-empty directory with
    /// `recursive=false` fails with `INVALID_OPERATION`.
    async fn delete_item(
        &self,
        path: &SyncPath,
        recursive: bool,
        is_sync_op: bool,
    ) -> Result<(), FsError>;

    /// Lists immediate children, ordered lexicographically by basename
    ///
    /// # Errors
    /// `NOT_FOUND` if absent, `INVALID_TYPE` for a file.
    async fn list_directory(&self, path: &SyncPath) -> Result<Vec<FileSystemItem>, FsError>;

    /// Full metadata including the content digest
    async fn get_metadata(&self, path: &SyncPath) -> Result<FileMetadata, FsError>;

    /// Opens a chunked content stream over a file
    async fn open_content_stream(&self, path: &SyncPath) -> Result<FileContentStream, FsError>;

    /// Acquires the surface lock
    ///
    /// Auto-releases after `timeout`. Fails with `LOCKED` if already
    /// held; the lock is re-entrancy-free.
    async fn lock(&self, timeout: Duration, reason: &str, mode: LockMode) -> Result<(), FsError>;

    /// Releases the surface lock; idempotent
    fn force_unlock(&self);

    /// Current lifecycle, lock, and last-operation snapshot
    fn state(&self) -> FsStateSnapshot;

    /// Hands over the substrate's change-event feed, if it has one
    ///
    /// Event-capable adapters (native) return the receiver exactly
    /// once; polling-only adapters return `None`. Events carry the
    /// affected engine path and serve only to wake the change detector
    /// early; detection itself always re-snapshots.
    fn take_event_feed(&self) -> Option<mpsc::Receiver<SyncPath>> {
        None
    }
}
