//! Starsync fs - the FileSystem capability
//!
//! Abstracts a rooted tree of files and directories over an arbitrary
//! substrate. Provides:
//! - The object-safe [`FileSystem`] trait consumed by sync targets
//! - Shared lock and lifecycle plumbing ([`SurfaceCore`])
//! - Finite, non-restartable content streaming ([`FileContentStream`])
//! - Two reference adapters: [`MemoryFileSystem`] (in-process tree)
//!   and [`LocalFileSystem`] (native host directory)

mod error;
mod filesystem;
pub mod hash;
mod lifecycle;
mod local;
mod lock;
mod memory;
mod stream;

pub use error::FsError;
pub use filesystem::{FileSystem, FsStateSnapshot, SubstrateKind, DEFAULT_CHUNK_SIZE};
pub use lifecycle::SurfaceCore;
pub use local::LocalFileSystem;
pub use lock::SurfaceLock;
pub use memory::MemoryFileSystem;
pub use stream::{ChunkSource, FileContentStream};
