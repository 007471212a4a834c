//! Domain layer - value types and state machines
//!
//! Everything in this module is substrate-agnostic: engine paths,
//! metadata records, change descriptions, and the transition tables
//! that govern component lifecycles.

pub mod errors;
pub mod path;
pub mod state;
pub mod types;

pub use errors::DomainError;
pub use path::{SyncPath, TargetId};
pub use state::{
    FsLifecycle, LockMode, LockState, ManagerState, TargetState, TransitionTable,
    FS_TRANSITIONS, MANAGER_TRANSITIONS, TARGET_TRANSITIONS,
};
pub use types::{
    ChangeType, ContentHash, FileChangeInfo, FileChunk, FileConflict, FileKind, FileMetadata,
    FileSystemItem,
};
