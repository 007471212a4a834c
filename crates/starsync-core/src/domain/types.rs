//! File metadata, chunk, and change-record value types
//!
//! These are the records that cross component boundaries: what a
//! surface reports about its files, how content travels in chunks,
//! and how a detected change is described to the manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::errors::DomainError;
use super::path::{SyncPath, TargetId};

// ============================================================================
// FileKind / ContentHash
// ============================================================================

/// Whether an entry is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
}

impl FileKind {
    /// Returns true for the directory variant
    pub fn is_directory(&self) -> bool {
        matches!(self, FileKind::Directory)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::File => write!(f, "file"),
            FileKind::Directory => write!(f, "directory"),
        }
    }
}

/// Hex-encoded SHA-256 digest of file content
///
/// Directories and delete tombstones carry the empty hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wraps a lowercase-hex digest string
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHash` if the string contains
    /// non-hex characters.
    pub fn new(hex: impl Into<String>) -> Result<Self, DomainError> {
        let hex = hex.into();
        if !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(DomainError::InvalidHash(hex));
        }
        Ok(Self(hex))
    }

    /// The empty hash used for directories and tombstones
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Returns true if this is the empty hash
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the hex digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// FileMetadata / FileSystemItem
// ============================================================================

/// Full metadata for one entry on a surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Engine path of the entry
    pub path: SyncPath,
    /// File or directory
    pub kind: FileKind,
    /// Digest of content (empty for directories)
    pub content_hash: ContentHash,
    /// Size in bytes (0 for directories)
    pub size_bytes: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

impl FileMetadata {
    /// Metadata for a directory (empty hash, zero size)
    pub fn directory(path: SyncPath, last_modified: DateTime<Utc>) -> Self {
        Self {
            path,
            kind: FileKind::Directory,
            content_hash: ContentHash::empty(),
            size_bytes: 0,
            last_modified,
        }
    }

    /// Tombstone metadata carried by delete changes
    pub fn tombstone(path: SyncPath, kind: FileKind, last_modified: DateTime<Utc>) -> Self {
        Self {
            path,
            kind,
            content_hash: ContentHash::empty(),
            size_bytes: 0,
            last_modified,
        }
    }

    /// Modification time as milliseconds since the Unix epoch
    pub fn last_modified_millis(&self) -> i64 {
        self.last_modified.timestamp_millis()
    }
}

/// Lightweight listing entry returned by directory enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemItem {
    /// Engine path of the entry
    pub path: SyncPath,
    /// File or directory
    pub kind: FileKind,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Size in bytes (None for directories)
    pub size_bytes: Option<u64>,
}

// ============================================================================
// FileChunk
// ============================================================================

/// One piece of a streamed file
///
/// All chunks of one file share the owning stream's metadata; the
/// per-chunk hash lets a consumer verify integrity while draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Raw chunk bytes
    pub data: Vec<u8>,
    /// Zero-based position within the file
    pub chunk_index: u32,
    /// Total number of chunks in the stream
    pub total_chunks: u32,
    /// Digest of this chunk's bytes
    pub chunk_hash: ContentHash,
}

impl FileChunk {
    /// Returns true if this is the final chunk of its stream
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.total_chunks
    }
}

// ============================================================================
// Change records
// ============================================================================

/// Classification of a detected change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Create => write!(f, "create"),
            ChangeType::Modify => write!(f, "modify"),
            ChangeType::Delete => write!(f, "delete"),
        }
    }
}

/// One change observed on a source target
///
/// For deletes, `metadata` is a tombstone (empty hash, zero size).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeInfo {
    /// Engine path the change applies to
    pub path: SyncPath,
    /// Create, modify, or delete
    pub change_type: ChangeType,
    /// Metadata of the entry as observed on the source
    pub metadata: FileMetadata,
    /// Target the change originated on
    pub source_target_id: TargetId,
}

impl FileChangeInfo {
    /// Builds a create or modify record from source metadata
    pub fn upsert(change_type: ChangeType, metadata: FileMetadata, source: TargetId) -> Self {
        Self {
            path: metadata.path.clone(),
            change_type,
            metadata,
            source_target_id: source,
        }
    }

    /// Builds a delete record carrying a tombstone
    pub fn delete(path: SyncPath, kind: FileKind, source: TargetId) -> Self {
        let metadata = FileMetadata::tombstone(path.clone(), kind, Utc::now());
        Self {
            path,
            change_type: ChangeType::Delete,
            metadata,
            source_target_id: source,
        }
    }

    /// Returns true for delete records
    pub fn is_delete(&self) -> bool {
        matches!(self.change_type, ChangeType::Delete)
    }
}

/// Record of a destination refusing an incoming change
///
/// Produced when the destination's copy is strictly newer than the
/// incoming version; nothing is written in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConflict {
    /// Unique id of this conflict record
    pub id: Uuid,
    /// Path the conflict occurred on
    pub path: SyncPath,
    /// Target the incoming change originated on
    pub source_target_id: TargetId,
    /// Destination target that refused the change
    pub target_id: TargetId,
    /// When the conflict was detected
    pub timestamp: DateTime<Utc>,
}

impl FileConflict {
    /// Creates a conflict record stamped with the current time
    pub fn new(path: SyncPath, source: TargetId, target: TargetId) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            source_target_id: source,
            target_id: target,
            timestamp: Utc::now(),
        }
    }
}
