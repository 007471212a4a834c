//! Pattern matching over root-relative paths
//!
//! Patterns follow gitignore conventions:
//! - `**` crosses any number of segments
//! - `dir/` matches the directory and everything under it
//! - a bare `name` (no slash) matches at any depth
//! - a pattern containing `/` is anchored at the root
//!
//! A pattern that fails to compile is logged and skipped; a matcher
//! error never blocks the caller (the path is reported as not
//! ignored).

use std::sync::RwLock;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use starsync_core::domain::SyncPath;

/// Patterns that are always ignored and cannot be edited away.
///
/// The version-control metadata directory must never cross surfaces.
const PROTECTED_PATTERNS: &[&str] = &[".git"];

/// Gitignore-style exclusion predicate
///
/// Thread-safe: the user pattern set can be replaced while other
/// threads are matching.
pub struct IgnoreMatcher {
    inner: RwLock<Inner>,
}

struct Inner {
    user_patterns: Vec<String>,
    globs: GlobSet,
}

impl IgnoreMatcher {
    /// Creates a matcher with the protected set only
    pub fn new() -> Self {
        Self::with_patterns(Vec::new())
    }

    /// Creates a matcher with the protected set plus `user_patterns`
    pub fn with_patterns(user_patterns: Vec<String>) -> Self {
        let globs = build_globset(&user_patterns);
        Self {
            inner: RwLock::new(Inner {
                user_patterns,
                globs,
            }),
        }
    }

    /// Replaces the user pattern set
    ///
    /// The protected set is unaffected. Unparseable patterns are
    /// skipped with a warning rather than failing the whole set.
    pub fn set_patterns(&self, patterns: Vec<String>) {
        let globs = build_globset(&patterns);
        let mut inner = self.inner.write().expect("ignore matcher lock poisoned");
        debug!(count = patterns.len(), "Replacing user ignore patterns");
        inner.user_patterns = patterns;
        inner.globs = globs;
    }

    /// Returns the active pattern list, protected set first
    pub fn patterns(&self) -> Vec<String> {
        let inner = self.inner.read().expect("ignore matcher lock poisoned");
        PROTECTED_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(inner.user_patterns.iter().cloned())
            .collect()
    }

    /// Returns true if `path` is excluded from replication
    ///
    /// Matching is performed on the root-relative form. Errors fail
    /// open: a path that cannot be matched is reported as not ignored.
    pub fn is_ignored(&self, path: &SyncPath) -> bool {
        let relative = path.relative_str();
        if relative.is_empty() {
            return false;
        }

        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(err) => {
                warn!(path = %path, error = %err, "Ignore matcher unavailable, treating as not ignored");
                return false;
            }
        };
        inner.globs.is_match(relative)
    }
}

impl Default for IgnoreMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles the protected set plus `user_patterns` into one GlobSet
fn build_globset(user_patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();

    for pattern in PROTECTED_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .chain(user_patterns.iter().cloned())
    {
        for glob in expand_pattern(&pattern) {
            match GlobBuilder::new(&glob).literal_separator(true).build() {
                Ok(compiled) => {
                    builder.add(compiled);
                }
                Err(err) => {
                    warn!(pattern = %pattern, glob = %glob, error = %err, "Skipping unparseable ignore pattern");
                }
            }
        }
    }

    match builder.build() {
        Ok(set) => set,
        Err(err) => {
            warn!(error = %err, "Failed to build ignore glob set, ignoring nothing");
            GlobSet::empty()
        }
    }
}

/// Translates one gitignore-style pattern into explicit globs
///
/// A matched directory also covers everything beneath it, and a
/// pattern without a slash floats to any depth.
fn expand_pattern(pattern: &str) -> Vec<String> {
    let trimmed = pattern.trim_end_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }

    let anchored = trimmed.contains('/');
    let mut globs = vec![trimmed.to_string(), format!("{trimmed}/**")];
    if !anchored {
        globs.push(format!("**/{trimmed}"));
        globs.push(format!("**/{trimmed}/**"));
    }
    globs
}
