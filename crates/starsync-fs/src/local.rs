//! Native host FileSystem adapter
//!
//! Backs a surface with a directory on the host filesystem via
//! `tokio::fs`. Engine paths are jailed under the configured root;
//! nothing above it is ever touched.
//!
//! When the OS supports it, a `notify` watcher feeds change events
//! into the surface's event feed so the change detector can wake
//! early. Watcher setup failures are logged and ignored - polling
//! remains the fallback detection source.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use starsync_core::domain::{
    ContentHash, FileChunk, FileKind, FileMetadata, FileSystemItem, FsLifecycle, LockMode,
    SyncPath,
};

use crate::error::{map_io_error, FsError};
use crate::filesystem::{FileSystem, FsStateSnapshot, SubstrateKind, DEFAULT_CHUNK_SIZE};
use crate::hash::StreamingDigest;
use crate::lifecycle::SurfaceCore;
use crate::stream::{ChunkSource, FileContentStream};

/// FileSystem over a native host directory
pub struct LocalFileSystem {
    root: PathBuf,
    surface: SurfaceCore,
    chunk_size: usize,
    watcher: Mutex<Option<RecommendedWatcher>>,
    event_rx: Mutex<Option<mpsc::Receiver<SyncPath>>>,
}

impl LocalFileSystem {
    /// Creates an uninitialized surface rooted at `root`
    ///
    /// The directory is created on `initialize` if missing.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_chunk_size(root, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a surface with a custom streaming chunk size
    pub fn with_chunk_size(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            surface: SurfaceCore::new(),
            chunk_size: chunk_size.max(1),
            watcher: Mutex::new(None),
            event_rx: Mutex::new(None),
        }
    }

    /// The host directory this surface is rooted at
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_native(&self, path: &SyncPath) -> PathBuf {
        if path.is_root() {
            self.root.clone()
        } else {
            self.root.join(path.relative_str())
        }
    }

    fn start_watcher(&self) {
        let (tx, rx) = mpsc::channel::<SyncPath>(1024);
        let root = self.root.clone();

        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    for native in &event.paths {
                        if let Some(path) = engine_path(&root, native) {
                            // Receiver gone means nobody is listening anymore
                            let _ = tx.blocking_send(path);
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Native watcher error");
                }
            },
            notify::Config::default(),
        );

        match watcher {
            Ok(mut watcher) => {
                if let Err(err) = watcher.watch(&self.root, RecursiveMode::Recursive) {
                    warn!(root = %self.root.display(), error = %err, "Cannot watch root, falling back to polling");
                    return;
                }
                *self.watcher.lock().expect("watcher slot poisoned") = Some(watcher);
                *self.event_rx.lock().expect("event feed poisoned") = Some(rx);
                debug!(root = %self.root.display(), "Native event feed started");
            }
            Err(err) => {
                warn!(error = %err, "Cannot create native watcher, falling back to polling");
            }
        }
    }

    async fn hash_file(&self, path: &SyncPath, native: &Path) -> Result<ContentHash, FsError> {
        let mut file = tokio::fs::File::open(native)
            .await
            .map_err(|e| map_io_error(path, e))?;
        let mut digest = StreamingDigest::new();
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|e| map_io_error(path, e))?;
            if read == 0 {
                break;
            }
            digest.update(&buffer[..read]);
        }
        Ok(digest.finish())
    }
}

/// Maps a native path back into the engine's path space
fn engine_path(root: &Path, native: &Path) -> Option<SyncPath> {
    let relative = native.strip_prefix(root).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    let mut joined = String::new();
    for component in relative.components() {
        joined.push('/');
        joined.push_str(component.as_os_str().to_str()?);
    }
    SyncPath::new(joined).ok()
}

fn modified_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    fn kind(&self) -> SubstrateKind {
        SubstrateKind::Native
    }

    async fn initialize(&self) -> Result<(), FsError> {
        self.surface.record("initialize");
        // Idempotent: a surface that is already serving stays as-is
        if matches!(
            self.surface.lifecycle(),
            FsLifecycle::Ready | FsLifecycle::Locked
        ) {
            return Ok(());
        }
        let root_path = SyncPath::root();
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| map_io_error(&root_path, e))?;
        self.surface.mark_ready()?;
        self.start_watcher();
        debug!(root = %self.root.display(), "Native surface initialized");
        Ok(())
    }

    async fn read_file(&self, path: &SyncPath) -> Result<Vec<u8>, FsError> {
        self.surface.record("read_file");
        self.surface.require_operational()?;

        let native = self.to_native(path);
        let metadata = tokio::fs::metadata(&native)
            .await
            .map_err(|e| map_io_error(path, e))?;
        if metadata.is_dir() {
            return Err(FsError::InvalidType(format!(
                "{path} is a directory, not a file"
            )));
        }
        tokio::fs::read(&native)
            .await
            .map_err(|e| map_io_error(path, e))
    }

    async fn write_file(
        &self,
        path: &SyncPath,
        data: &[u8],
        is_sync_op: bool,
    ) -> Result<(), FsError> {
        self.surface.record("write_file");
        self.surface.check_write(is_sync_op)?;

        let parent = path
            .parent()
            .ok_or_else(|| FsError::InvalidType("cannot write the root".to_string()))?;
        let native_parent = self.to_native(&parent);
        let parent_meta = tokio::fs::metadata(&native_parent)
            .await
            .map_err(|e| map_io_error(&parent, e))?;
        if !parent_meta.is_dir() {
            return Err(FsError::InvalidType(format!("{parent} is not a directory")));
        }

        let native = self.to_native(path);
        if let Ok(existing) = tokio::fs::metadata(&native).await {
            if existing.is_dir() {
                return Err(FsError::InvalidType(format!("{path} is a directory")));
            }
        }

        tokio::fs::write(&native, data)
            .await
            .map_err(|e| map_io_error(path, e))
    }

    async fn exists(&self, path: &SyncPath) -> Result<bool, FsError> {
        self.surface.record("exists");
        self.surface.require_operational()?;
        tokio::fs::try_exists(self.to_native(path))
            .await
            .map_err(|e| map_io_error(path, e))
    }

    async fn create_directory(
        &self,
        path: &SyncPath,
        recursive: bool,
        is_sync_op: bool,
    ) -> Result<(), FsError> {
        self.surface.record("create_directory");
        self.surface.check_write(is_sync_op)?;

        let native = self.to_native(path);
        if recursive {
            tokio::fs::create_dir_all(&native)
                .await
                .map_err(|e| map_io_error(path, e))
        } else {
            tokio::fs::create_dir(&native)
                .await
                .map_err(|e| map_io_error(path, e))
        }
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

        let native = self.to_native(path);
        let metadata = tokio::fs::metadata(&native)
            .await
            .map_err(|e| map_io_error(path, e))?;

        if metadata.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&native)
                    .await
                    .map_err(|e| map_io_error(path, e))
            } else {
                let mut entries = tokio::fs::read_dir(&native)
                    .await
                    .map_err(|e| map_io_error(path, e))?;
                if entries
                    .next_entry()
                    .await
                    .map_err(|e| map_io_error(path, e))?
                    .is_some()
                {
                    return Err(FsError::InvalidOperation(format!(
                        "{path} is a non-empty directory"
                    )));
                }
                tokio::fs::remove_dir(&native)
                    .await
                    .map_err(|e| map_io_error(path, e))
            }
        } else {
            tokio::fs::remove_file(&native)
                .await
                .map_err(|e| map_io_error(path, e))
        }
    }

    async fn list_directory(&self, path: &SyncPath) -> Result<Vec<FileSystemItem>, FsError> {
        self.surface.record("list_directory");
        self.surface.require_operational()?;

        let native = self.to_native(path);
        let metadata = tokio::fs::metadata(&native)
            .await
            .map_err(|e| map_io_error(path, e))?;
        if !metadata.is_dir() {
            return Err(FsError::InvalidType(format!("{path} is not a directory")));
        }

        let mut entries = tokio::fs::read_dir(&native)
            .await
            .map_err(|e| map_io_error(path, e))?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| map_io_error(path, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(entry = ?entry.path(), "Skipping non-UTF-8 entry name");
                continue;
            };
            let entry_meta = entry
                .metadata()
                .await
                .map_err(|e| map_io_error(path, e))?;
            let child = path.join(&name)?;
            items.push(FileSystemItem {
                path: child,
                kind: if entry_meta.is_dir() {
                    FileKind::Directory
                } else {
                    FileKind::File
                },
                last_modified: modified_time(&entry_meta),
                size_bytes: if entry_meta.is_dir() {
                    None
                } else {
                    Some(entry_meta.len())
                },
            });
        }

        items.sort_by(|a, b| {
            a.path
                .file_name()
                .unwrap_or_default()
                .cmp(b.path.file_name().unwrap_or_default())
        });
        Ok(items)
    }

    async fn get_metadata(&self, path: &SyncPath) -> Result<FileMetadata, FsError> {
        self.surface.record("get_metadata");
        self.surface.require_operational()?;

        let native = self.to_native(path);
        let metadata = tokio::fs::metadata(&native)
            .await
            .map_err(|e| map_io_error(path, e))?;

        if metadata.is_dir() {
            return Ok(FileMetadata::directory(path.clone(), modified_time(&metadata)));
        }

        let content_hash = self.hash_file(path, &native).await?;
        Ok(FileMetadata {
            path: path.clone(),
            kind: FileKind::File,
            content_hash,
            size_bytes: metadata.len(),
            last_modified: modified_time(&metadata),
        })
    }

    async fn open_content_stream(&self, path: &SyncPath) -> Result<FileContentStream, FsError> {
        self.surface.record("open_content_stream");
        self.surface.require_operational()?;

        let metadata = self.get_metadata(path).await?;
        if metadata.kind.is_directory() {
            return Err(FsError::InvalidType(format!(
                "{path} is a directory, not a file"
            )));
        }

        let native = self.to_native(path);
        let file = tokio::fs::File::open(&native)
            .await
            .map_err(|e| map_io_error(path, e))?;
        let total_chunks =
            ((metadata.size_bytes as usize).div_ceil(self.chunk_size)).max(1) as u32;

        Ok(FileContentStream::new(
            metadata,
            Box::new(LocalChunkSource {
                file,
                path: path.clone(),
                chunk_size: self.chunk_size,
                next_index: 0,
                total_chunks,
            }),
        ))
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

    fn take_event_feed(&self) -> Option<mpsc::Receiver<SyncPath>> {
        self.event_rx.lock().expect("event feed poisoned").take()
    }
}

// ============================================================================
// LocalChunkSource
// ============================================================================

/// Chunk source reading sequentially from an open file handle
struct LocalChunkSource {
    file: tokio::fs::File,
    path: SyncPath,
    chunk_size: usize,
    next_index: u32,
    total_chunks: u32,
}

#[async_trait]
impl ChunkSource for LocalChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<FileChunk>, FsError> {
        if self.next_index >= self.total_chunks {
            return Ok(None);
        }

        let mut data = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let read = self
                .file
                .read(&mut data[filled..])
                .await
                .map_err(|e| map_io_error(&self.path, e))?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        data.truncate(filled);

        let chunk = FileChunk {
            chunk_hash: crate::hash::digest_bytes(&data),
            chunk_index: self.next_index,
            total_chunks: self.total_chunks,
            data,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }
}
