//! FileSystem error type
//!
//! One enum per user-visible error code. `code()` exposes the stable
//! wire identifier for each variant.

use starsync_core::domain::{DomainError, SyncPath};
use thiserror::Error;

/// Errors raised by FileSystem operations
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not exist
    #[error("Not found: {0}")]
    NotFound(SyncPath),

    /// Path already exists
    #[error("Already exists: {0}")]
    AlreadyExists(SyncPath),

    /// Operation is not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Entry kind does not match the operation (file vs directory)
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// Substrate refused access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Surface is locked against this writer
    #[error("Surface is locked: {0}")]
    Locked(String),

    /// Underlying substrate I/O failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Domain validation failure (path construction, hashes)
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl FsError {
    /// Stable user-visible code for this error
    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound(_) => "NOT_FOUND",
            FsError::AlreadyExists(_) => "ALREADY_EXISTS",
            FsError::InvalidOperation(_) => "INVALID_OPERATION",
            FsError::InvalidType(_) => "INVALID_TYPE",
            FsError::PermissionDenied(_) => "PERMISSION_DENIED",
            FsError::Locked(_) => "LOCKED",
            FsError::Io { .. } => "INVALID_OPERATION",
            FsError::Domain(_) => "INVALID_OPERATION",
        }
    }

    /// Returns true for the not-found variant
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

/// Maps a substrate I/O error onto the capability's error codes
pub(crate) fn map_io_error(path: &SyncPath, err: std::io::Error) -> FsError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.clone()),
        ErrorKind::AlreadyExists => FsError::AlreadyExists(path.clone()),
        ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_string()),
        _ => FsError::Io {
            path: path.to_string(),
            source: err,
        },
    }
}
