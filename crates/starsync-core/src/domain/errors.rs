//! Domain error types
//!
//! Validation failures and invalid state transitions raised by the
//! value types in this crate. Component-level errors (filesystem,
//! engine) live in their own crates.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid engine path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid target identifier
    #[error("Invalid target id: {0}")]
    InvalidTargetId(String),

    /// Invalid content hash format (expected lowercase hex)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
