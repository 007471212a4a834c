//! Starsync core - shared domain model
//!
//! Provides:
//! - Validated path and identifier newtypes
//! - File metadata, chunk, and change-record value types
//! - Data-encoded state machines shared by all components
//! - Typed configuration with YAML loading

pub mod config;
pub mod domain;

pub use config::Config;
pub use domain::errors::DomainError;
