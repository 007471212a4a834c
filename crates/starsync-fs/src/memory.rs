//! In-memory FileSystem adapter
//!
//! Backs a surface with an in-process tree. Stands in for sandboxed
//! and browser-local substrates, and carries most of the engine's test
//! load. Ordering of `BTreeMap` keys gives directory listings their
//! lexicographic basename order for free.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use starsync_core::domain::{
    FileKind, FileMetadata, FileSystemItem, FsLifecycle, LockMode, SyncPath,
};

use crate::error::FsError;
use crate::filesystem::{FileSystem, FsStateSnapshot, SubstrateKind, DEFAULT_CHUNK_SIZE};
use crate::hash;
use crate::lifecycle::SurfaceCore;
use crate::stream::FileContentStream;

#[derive(Debug, Clone)]
struct Node {
    kind: FileKind,
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

impl Node {
    fn directory() -> Self {
        Self {
            kind: FileKind::Directory,
            data: Vec::new(),
            modified: Utc::now(),
        }
    }

    fn file(data: Vec<u8>) -> Self {
        Self {
            kind: FileKind::File,
            data,
            modified: Utc::now(),
        }
    }
}

/// FileSystem over an in-process tree
pub struct MemoryFileSystem {
    surface: SurfaceCore,
    tree: Mutex<BTreeMap<SyncPath, Node>>,
    chunk_size: usize,
}

impl MemoryFileSystem {
    /// Creates an uninitialized in-memory surface
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Creates a surface with a custom streaming chunk size
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            surface: SurfaceCore::new(),
            tree: Mutex::new(BTreeMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    fn with_tree<T>(&self, f: impl FnOnce(&mut BTreeMap<SyncPath, Node>) -> T) -> T {
        let mut tree = self.tree.lock().expect("memory tree poisoned");
        f(&mut tree)
    }

    fn node_metadata(path: &SyncPath, node: &Node) -> FileMetadata {
        match node.kind {
            FileKind::Directory => FileMetadata::directory(path.clone(), node.modified),
            FileKind::File => FileMetadata {
                path: path.clone(),
                kind: FileKind::File,
                content_hash: hash::digest_bytes(&node.data),
                size_bytes: node.data.len() as u64,
                last_modified: node.modified,
            },
        }
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    fn kind(&self) -> SubstrateKind {
        SubstrateKind::Memory
    }

    async fn initialize(&self) -> Result<(), FsError> {
        self.surface.record("initialize");
        // Idempotent: a surface that is already serving stays as-is
        if !matches!(
            self.surface.lifecycle(),
            FsLifecycle::Ready | FsLifecycle::Locked
        ) {
            self.surface.mark_ready()?;
        }
        self.with_tree(|tree| {
            tree.entry(SyncPath::root()).or_insert_with(Node::directory);
        });
        debug!("Memory surface initialized");
        Ok(())
    }

    async fn read_file(&self, path: &SyncPath) -> Result<Vec<u8>, FsError> {
        self.surface.record("read_file");
        self.surface.require_operational()?;
        self.with_tree(|tree| match tree.get(path) {
            None => Err(FsError::NotFound(path.clone())),
            Some(node) if node.kind.is_directory() => Err(FsError::InvalidType(format!(
                "{path} is a directory, not a file"
            ))),
            Some(node) => Ok(node.data.clone()),
        })
    }

    async fn write_file(
        &self,
        path: &SyncPath,
        data: &[u8],
        is_sync_op: bool,
    ) -> Result<(), FsError> {
        self.surface.record("write_file");
        self.surface.check_write(is_sync_op)?;

        self.with_tree(|tree| {
            let parent = path
                .parent()
                .ok_or_else(|| FsError::InvalidType("cannot write the root".to_string()))?;
            match tree.get(&parent) {
                None => return Err(FsError::NotFound(parent)),
                Some(node) if !node.kind.is_directory() => {
                    return Err(FsError::InvalidType(format!("{parent} is not a directory")))
                }
                Some(_) => {}
            }
            if let Some(existing) = tree.get(path) {
                if existing.kind.is_directory() {
                    return Err(FsError::InvalidType(format!("{path} is a directory")));
                }
            }
            tree.insert(path.clone(), Node::file(data.to_vec()));
            Ok(())
        })
    }

    async fn exists(&self, path: &SyncPath) -> Result<bool, FsError> {
        self.surface.record("exists");
        self.surface.require_operational()?;
        Ok(self.with_tree(|tree| tree.contains_key(path)))
    }

    async fn create_directory(
        &self,
        path: &SyncPath,
        recursive: bool,
        is_sync_op: bool,
    ) -> Result<(), FsError> {
        self.surface.record("create_directory");
        self.surface.check_write(is_sync_op)?;

        self.with_tree(|tree| {
            if let Some(existing) = tree.get(path) {
                return if !existing.kind.is_directory() {
                    Err(FsError::InvalidType(format!("{path} exists as a file")))
                } else if recursive {
                    Ok(())
                } else {
                    Err(FsError::AlreadyExists(path.clone()))
                };
            }

            if recursive {
                // Materialize missing ancestors from the root downward
                let mut current = SyncPath::root();
                for segment in path.relative_str().split('/') {
                    current = current.join(segment)?;
                    match tree.get(&current) {
                        Some(node) if !node.kind.is_directory() => {
                            return Err(FsError::InvalidType(format!(
                                "{current} exists as a file"
                            )))
                        }
                        Some(_) => {}
                        None => {
                            tree.insert(current.clone(), Node::directory());
                        }
                    }
                }
                Ok(())
            } else {
                let parent = path
                    .parent()
                    .ok_or_else(|| FsError::AlreadyExists(SyncPath::root()))?;
                match tree.get(&parent) {
                    None => Err(FsError::NotFound(parent)),
                    Some(node) if !node.kind.is_directory() => {
                        Err(FsError::InvalidType(format!("{parent} is not a directory")))
                    }
                    Some(_) => {
                        tree.insert(path.clone(), Node::directory());
                        Ok(())
                    }
                }
            }
        })
    }

    async fn delete_item(
        &self,
        path: &SyncPath,
        recursive: bool,
        is_sync_op: bool,
    ) -> Result<(), FsError> {
        self.surface.record("delete_item");
        self.surface.check_write(is_sync_op)?;

        if path.is_root() {
            return Err(FsError::InvalidOperation(
                "cannot delete the root".to_string(),
            ));
        }

        self.with_tree(|tree| {
            let node = tree
                .get(path)
                .ok_or_else(|| FsError::NotFound(path.clone()))?;

            if node.kind.is_directory() {
                let descendants: Vec<SyncPath> = tree
                    .keys()
                    .filter(|p| *p != path && p.starts_with(path))
                    .cloned()
                    .collect();
                if !descendants.is_empty() && !recursive {
                    return Err(FsError::InvalidOperation(format!(
                        "{path} is a non-empty directory"
                    )));
                }
                for descendant in descendants {
                    tree.remove(&descendant);
                }
            }
            tree.remove(path);
            Ok(())
        })
    }

    async fn list_directory(&self, path: &SyncPath) -> Result<Vec<FileSystemItem>, FsError> {
        self.surface.record("list_directory");
        self.surface.require_operational()?;

        self.with_tree(|tree| {
            match tree.get(path) {
                None => return Err(FsError::NotFound(path.clone())),
                Some(node) if !node.kind.is_directory() => {
                    return Err(FsError::InvalidType(format!("{path} is not a directory")))
                }
                Some(_) => {}
            }

            // BTreeMap order on full paths is basename order within one parent
            let items = tree
                .iter()
                .filter(|(p, _)| p.parent().as_ref() == Some(path))
                .map(|(p, node)| FileSystemItem {
                    path: p.clone(),
                    kind: node.kind,
                    last_modified: node.modified,
                    size_bytes: match node.kind {
                        FileKind::File => Some(node.data.len() as u64),
                        FileKind::Directory => None,
                    },
                })
                .collect();
            Ok(items)
        })
    }

    async fn get_metadata(&self, path: &SyncPath) -> Result<FileMetadata, FsError> {
        self.surface.record("get_metadata");
        self.surface.require_operational()?;
        self.with_tree(|tree| {
            tree.get(path)
                .map(|node| Self::node_metadata(path, node))
                .ok_or_else(|| FsError::NotFound(path.clone()))
        })
    }

    async fn open_content_stream(&self, path: &SyncPath) -> Result<FileContentStream, FsError> {
        self.surface.record("open_content_stream");
        self.surface.require_operational()?;

        let (metadata, data) = self.with_tree(|tree| match tree.get(path) {
            None => Err(FsError::NotFound(path.clone())),
            Some(node) if node.kind.is_directory() => Err(FsError::InvalidType(format!(
                "{path} is a directory, not a file"
            ))),
            Some(node) => Ok((Self::node_metadata(path, node), node.data.clone())),
        })?;

        Ok(FileContentStream::from_bytes(metadata, data, self.chunk_size))
    }

    async fn lock(&self, timeout: Duration, reason: &str, mode: LockMode) -> Result<(), FsError> {
        self.surface.record("lock");
        self.surface.lock(timeout, reason, mode)
    }

    fn force_unlock(&self) {
        self.surface.record("force_unlock");
        self.surface.force_unlock();
    }

    fn state(&self) -> FsStateSnapshot {
        self.surface.snapshot()
    }
}
