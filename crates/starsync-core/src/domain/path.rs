//! Path and identifier newtypes with validation
//!
//! A [`SyncPath`] is the engine's canonical path representation:
//! UTF-8, forward-slash separated, absolute from the surface root
//! ("/a/b"), and normalized at construction. Substrate adapters map
//! these to their own native representation; the engine itself never
//! sees a native path.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// SyncPath
// ============================================================================

/// Normalized absolute engine path
///
/// Invariants held after construction:
/// - starts with `/`; `/` alone is the root
/// - no empty segments, no `.` or `..` segments
/// - no trailing slash (except the root itself)
///
/// Equality and ordering are byte-exact on the normalized form, so
/// `SyncPath` can key ordered maps directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncPath(String);

impl SyncPath {
    /// Parses and normalizes a path string
    ///
    /// Empty segments (`//`) are collapsed; a trailing slash is dropped.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the input does not start
    /// with `/` or contains a `.` or `..` segment.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = raw.as_ref();
        if !raw.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "not absolute from root: {raw}"
            )));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" => continue,
                "." | ".." => {
                    return Err(DomainError::InvalidPath(format!(
                        "relative segment in path: {raw}"
                    )))
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// Returns the root path `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Returns the normalized string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the root path
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Appends a relative component, normalizing the result
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the component contains
    /// `.` or `..` segments.
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if self.is_root() {
            Self::new(format!("/{component}"))
        } else {
            Self::new(format!("{}/{component}", self.0))
        }
    }

    /// Returns the parent path, or `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Returns the final segment, or `None` for the root
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Returns the path without its leading slash (`""` for the root)
    ///
    /// This is the form matched against ignore patterns and joined onto
    /// native adapter roots.
    pub fn relative_str(&self) -> &str {
        self.0.trim_start_matches('/')
    }

    /// Number of segments below the root (the root itself is 0)
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// Returns true if `self` equals `ancestor` or lies beneath it
    pub fn starts_with(&self, ancestor: &SyncPath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0)
                && self.0.as_bytes().get(ancestor.0.len()) == Some(&b'/'))
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// TargetId
// ============================================================================

/// Identifier for a replication target
///
/// Target ids are caller-chosen, non-empty strings; uniqueness across
/// the registered set is enforced by the manager at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Creates a target id, rejecting empty or whitespace-only input
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(DomainError::InvalidTargetId(
                "target id must not be empty".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TargetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TargetId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
