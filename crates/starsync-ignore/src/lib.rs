//! Starsync ignore - gitignore-style path exclusion
//!
//! Provides the [`IgnoreMatcher`] predicate consumed by the change
//! detector and the fan-out path. Two pattern sets are combined:
//! a protected set that is always on (version-control metadata), and
//! a user set that can be replaced at runtime.

mod matcher;

pub use matcher::IgnoreMatcher;
