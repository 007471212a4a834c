//! Sync target - one replicated surface
//!
//! A [`SyncTarget`] wraps a FileSystem with identity, a role, a
//! lifecycle state machine, and the bookkeeping that makes replication
//! loop-free:
//!
//! - **Origin-timestamp overlay.** A sync-origin write lands with the
//!   substrate's own `now` as mtime. The overlay remembers the change's
//!   original timestamp keyed by the mtime the write actually produced,
//!   so metadata reads report the origin time - and a later local edit
//!   (which moves the mtime) automatically invalidates the entry.
//! - **Baseline snapshot.** The change detector diffs the current tree
//!   against the baseline. Sync-origin applies update the baseline in
//!   place, so the next tick observes nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use starsync_core::config::EngineConfig;
use starsync_core::domain::{
    ChangeType, FileChangeInfo, FileConflict, FileKind, FileMetadata, FileSystemItem, LockMode,
    SyncPath, TargetId, TargetState, TARGET_TRANSITIONS,
};
use starsync_fs::{FileContentStream, FileSystem, FsStateSnapshot, SubstrateKind};
use starsync_ignore::IgnoreMatcher;

use crate::detector;
use crate::error::SyncError;

/// Role a target plays in the star topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    /// The single authoritative surface
    Primary,
    /// A mirror of the primary
    Secondary,
}

impl std::fmt::Display for TargetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetRole::Primary => write!(f, "primary"),
            TargetRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Callback invoked with each detected change batch
pub type ChangeCallback =
    Arc<dyn Fn(TargetId, Vec<FileChangeInfo>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Point-in-time view of a target
#[derive(Debug, Clone)]
pub struct TargetStateSnapshot {
    pub id: TargetId,
    pub kind: SubstrateKind,
    pub role: Option<TargetRole>,
    pub state: TargetState,
    pub initial_sync_pending: bool,
    pub filesystem: Option<FsStateSnapshot>,
}

#[derive(Debug, Clone, Copy)]
struct OverlayEntry {
    /// Timestamp the change carried at its origin
    origin: DateTime<Utc>,
    /// Mtime the substrate stamped when the sync write landed
    observed: DateTime<Utc>,
}

/// Baseline view of one tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BaselineEntry {
    pub(crate) modified: DateTime<Utc>,
    pub(crate) kind: FileKind,
}

struct WatchHandle {
    token: CancellationToken,
    _task: tokio::task::JoinHandle<()>,
}

/// One replicated surface with change detection
pub struct SyncTarget {
    id: TargetId,
    kind: SubstrateKind,
    lock_timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) debounce: Duration,
    ignore: Arc<IgnoreMatcher>,
    state: Mutex<TargetState>,
    role: Mutex<Option<TargetRole>>,
    fs: Mutex<Option<Arc<dyn FileSystem>>>,
    overlay: DashMap<SyncPath, OverlayEntry>,
    baseline: Mutex<HashMap<SyncPath, BaselineEntry>>,
    initial_sync_pending: AtomicBool,
    watch: Mutex<Option<WatchHandle>>,
}

impl SyncTarget {
    /// Creates an uninitialized target with default timings
    pub fn new(id: TargetId, kind: SubstrateKind, ignore: Arc<IgnoreMatcher>) -> Self {
        Self::with_config(id, kind, ignore, &EngineConfig::default())
    }

    /// Creates an uninitialized target with configured timings
    pub fn with_config(
        id: TargetId,
        kind: SubstrateKind,
        ignore: Arc<IgnoreMatcher>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            id,
            kind,
            lock_timeout: config.lock_timeout(),
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
            ignore,
            state: Mutex::new(TargetState::Uninitialized),
            role: Mutex::new(None),
            fs: Mutex::new(None),
            overlay: DashMap::new(),
            baseline: Mutex::new(HashMap::new()),
            initial_sync_pending: AtomicBool::new(false),
            watch: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// This target's identity
    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// The substrate kind this target expects
    pub fn substrate_kind(&self) -> SubstrateKind {
        self.kind
    }

    /// The role assigned at initialization
    pub fn role(&self) -> Option<TargetRole> {
        *self.role.lock().expect("target role poisoned")
    }

    /// Returns true if initialized as the primary
    pub fn is_primary(&self) -> bool {
        matches!(self.role(), Some(TargetRole::Primary))
    }

    /// Current lifecycle state
    pub fn state(&self) -> TargetState {
        *self.state.lock().expect("target state poisoned")
    }

    /// True while a secondary awaits its first bootstrap
    pub fn initial_sync_pending(&self) -> bool {
        self.initial_sync_pending.load(Ordering::Acquire)
    }

    fn filesystem(&self) -> Result<Arc<dyn FileSystem>, SyncError> {
        self.fs
            .lock()
            .expect("target fs poisoned")
            .clone()
            .ok_or_else(|| {
                SyncError::InitializationFailed(format!("target {} has no filesystem", self.id))
            })
    }

    // ------------------------------------------------------------------
    // State machine helpers
    // ------------------------------------------------------------------

    fn transition(&self, to: TargetState) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("target state poisoned");
        if let Err(err) = TARGET_TRANSITIONS.check(*state, to) {
            warn!(target = %self.id, from = %*state, %to, "Invalid target transition, driving to error");
            *state = TargetState::Error;
            return Err(err.into());
        }
        *state = to;
        Ok(())
    }

    fn force_state(&self, to: TargetState) {
        *self.state.lock().expect("target state poisoned") = to;
    }

    pub(crate) fn set_error(&self) {
        self.force_state(TargetState::Error);
    }

    /// Enters syncing from collecting; idempotent while syncing
    pub(crate) fn ensure_syncing(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("target state poisoned");
        match *state {
            TargetState::Syncing => Ok(()),
            TargetState::Collecting => {
                *state = TargetState::Syncing;
                Ok(())
            }
            other => Err(SyncError::InvalidState {
                from: other.to_string(),
                to: TargetState::Syncing.to_string(),
            }),
        }
    }

    /// Drops the surface lock without a lifecycle transition
    pub(crate) fn force_unlock_surface(&self) {
        if let Ok(fs) = self.filesystem() {
            fs.force_unlock();
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Binds a FileSystem and assigns the role
    ///
    /// A primary captures its baseline snapshot so watching starts
    /// quiet; a secondary is marked initial-sync-pending until its
    /// first bootstrap completes.
    ///
    /// # Errors
    /// `INITIALIZATION_FAILED` when the substrate kind does not match
    /// the target's declared kind or the surface cannot initialize.
    pub async fn initialize(
        &self,
        fs: Arc<dyn FileSystem>,
        is_primary: bool,
    ) -> Result<(), SyncError> {
        if fs.kind() != self.kind {
            self.set_error();
            return Err(SyncError::InitializationFailed(format!(
                "substrate mismatch on {}: target expects {}, filesystem is {}",
                self.id,
                self.kind,
                fs.kind()
            )));
        }

        if let Err(err) = fs.initialize().await {
            self.set_error();
            return Err(SyncError::InitializationFailed(format!(
                "surface initialize failed on {}: {err}",
                self.id
            )));
        }

        *self.fs.lock().expect("target fs poisoned") = Some(fs);
        *self.role.lock().expect("target role poisoned") = Some(if is_primary {
            TargetRole::Primary
        } else {
            TargetRole::Secondary
        });

        if is_primary {
            let snapshot = match self.scan_snapshot().await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    self.set_error();
                    return Err(err);
                }
            };
            self.replace_baseline(snapshot);
            self.initial_sync_pending.store(false, Ordering::Release);
        } else {
            self.replace_baseline(HashMap::new());
            self.initial_sync_pending.store(true, Ordering::Release);
        }

        self.transition(TargetState::Idle)?;
        info!(target = %self.id, kind = %self.kind, primary = is_primary, "Target initialized");
        Ok(())
    }

    /// Recovers an errored target back to idle
    pub fn recover(&self) -> Result<(), SyncError> {
        self.force_unlock_surface();
        if self.state() == TargetState::Error {
            self.transition(TargetState::Idle)?;
            info!(target = %self.id, "Target recovered from error");
        }
        Ok(())
    }

    /// Opens a sync cycle: acquires the sync-mode lock and starts collecting
    pub async fn notify_incoming_changes(&self, paths: &[SyncPath]) -> Result<(), SyncError> {
        let fs = self.filesystem()?;
        fs.lock(self.lock_timeout, "incoming sync", LockMode::Sync)
            .await?;
        if let Err(err) = self.transition(TargetState::Collecting) {
            fs.force_unlock();
            return Err(err);
        }
        debug!(target = %self.id, announced = paths.len(), "Sync cycle opened");
        Ok(())
    }

    /// Closes a sync cycle: releases the lock and returns to idle
    pub async fn sync_complete(&self) -> Result<(), SyncError> {
        self.force_unlock_surface();
        match self.state() {
            TargetState::Collecting | TargetState::Syncing => {
                self.transition(TargetState::Idle)?;
                debug!(target = %self.id, "Sync cycle closed");
                Ok(())
            }
            // Already settled, or terminal: the lock release is all that's left
            _ => Ok(()),
        }
    }

    /// Releases resources and returns to uninitialized
    pub async fn dispose(&self) {
        self.unwatch();
        self.force_unlock_surface();
        *self.fs.lock().expect("target fs poisoned") = None;
        *self.role.lock().expect("target role poisoned") = None;
        self.overlay.clear();
        self.baseline
            .lock()
            .expect("target baseline poisoned")
            .clear();
        self.initial_sync_pending.store(false, Ordering::Release);
        self.force_state(TargetState::Uninitialized);
        info!(target = %self.id, "Target disposed");
    }

    // ------------------------------------------------------------------
    // Metadata and content
    // ------------------------------------------------------------------

    /// Metadata for each path, with origin timestamps overlaid
    pub async fn get_metadata(&self, paths: &[SyncPath]) -> Result<Vec<FileMetadata>, SyncError> {
        let fs = self.filesystem()?;
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let mut metadata = fs.get_metadata(path).await?;
            metadata.last_modified = self.effective_modified(path, metadata.last_modified);
            out.push(metadata);
        }
        Ok(out)
    }

    /// Opens a content stream, with the origin timestamp overlaid
    pub async fn get_file_content(&self, path: &SyncPath) -> Result<FileContentStream, SyncError> {
        let fs = self.filesystem()?;
        let stream = fs.open_content_stream(path).await?;
        let (mut metadata, source) = stream.into_parts();
        metadata.last_modified = self.effective_modified(path, metadata.last_modified);
        Ok(match source {
            Some(source) => FileContentStream::new(metadata, source),
            None => FileContentStream::empty(metadata),
        })
    }

    /// Lists a directory, with origin timestamps overlaid
    pub async fn list_directory(&self, path: &SyncPath) -> Result<Vec<FileSystemItem>, SyncError> {
        let fs = self.filesystem()?;
        let mut items = fs.list_directory(path).await?;
        for item in &mut items {
            item.last_modified = self.effective_modified(&item.path, item.last_modified);
        }
        Ok(items)
    }

    /// Point-in-time view of this target
    pub fn get_state(&self) -> TargetStateSnapshot {
        TargetStateSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            role: self.role(),
            state: self.state(),
            initial_sync_pending: self.initial_sync_pending(),
            filesystem: self
                .fs
                .lock()
                .expect("target fs poisoned")
                .as_ref()
                .map(|fs| fs.state()),
        }
    }

    // ------------------------------------------------------------------
    // Applying changes
    // ------------------------------------------------------------------

    /// Applies one incoming change
    ///
    /// Deletes are idempotent: an absent path is a no-op success.
    /// For creates and modifies, a destination copy with a strictly
    /// newer effective mtime wins - a [`FileConflict`] is returned and
    /// nothing is written.
    ///
    /// Called from idle, the target opens (and closes) its own sync
    /// cycle; called while collecting or syncing it joins the cycle the
    /// caller owns. Any other state is an invalid operation.
    pub async fn apply_file_change(
        &self,
        change: &FileChangeInfo,
        content: Option<FileContentStream>,
    ) -> Result<Option<FileConflict>, SyncError> {
        let owns_cycle = match self.state() {
            TargetState::Idle => {
                self.notify_incoming_changes(std::slice::from_ref(&change.path))
                    .await?;
                true
            }
            TargetState::Collecting | TargetState::Syncing => false,
            other => {
                return Err(SyncError::InvalidState {
                    from: other.to_string(),
                    to: TargetState::Syncing.to_string(),
                })
            }
        };
        self.ensure_syncing()?;

        let result = self.apply_inner(change, content).await;

        if result.is_err() {
            warn!(target = %self.id, path = %change.path, "Apply failed, target entering error");
            self.set_error();
        }
        if owns_cycle {
            // sync_complete releases the lock; after an error it leaves
            // the terminal state alone
            let _ = self.sync_complete().await;
        }
        result
    }

    async fn apply_inner(
        &self,
        change: &FileChangeInfo,
        content: Option<FileContentStream>,
    ) -> Result<Option<FileConflict>, SyncError> {
        let fs = self.filesystem()?;

        match change.change_type {
            ChangeType::Delete => {
                if fs.exists(&change.path).await? {
                    fs.delete_item(&change.path, true, true).await?;
                    debug!(target = %self.id, path = %change.path, "Applied delete");
                }
                self.forget_subtree(&change.path);
                Ok(None)
            }
            ChangeType::Create | ChangeType::Modify => {
                if change.metadata.kind.is_directory() {
                    if !fs.exists(&change.path).await? {
                        fs.create_directory(&change.path, true, true).await?;
                    }
                    self.remember_applied(&fs, &change.path, FileKind::Directory, change.metadata.last_modified)
                        .await?;
                    return Ok(None);
                }

                if fs.exists(&change.path).await? {
                    let dest_meta = fs.get_metadata(&change.path).await?;
                    let effective = self.effective_modified(&change.path, dest_meta.last_modified);
                    if effective > change.metadata.last_modified {
                        info!(
                            target = %self.id,
                            path = %change.path,
                            destination_ms = effective.timestamp_millis(),
                            incoming_ms = change.metadata.last_modified_millis(),
                            "Destination newer than incoming change, raising conflict"
                        );
                        return Ok(Some(FileConflict::new(
                            change.path.clone(),
                            change.source_target_id.clone(),
                            self.id.clone(),
                        )));
                    }
                }

                let stream = content.ok_or_else(|| SyncError::ApplyFailed {
                    target: self.id.clone(),
                    reason: format!("missing content stream for {}", change.path),
                })?;
                let bytes = stream.drain().await?;

                if let Some(parent) = change.path.parent() {
                    if !parent.is_root() && !fs.exists(&parent).await? {
                        fs.create_directory(&parent, true, true).await?;
                    }
                }
                fs.write_file(&change.path, &bytes, true).await?;
                self.remember_applied(&fs, &change.path, FileKind::File, change.metadata.last_modified)
                    .await?;
                debug!(target = %self.id, path = %change.path, bytes = bytes.len(), "Applied {}", change.change_type);
                Ok(None)
            }
        }
    }

    /// Records a sync-origin apply in the overlay and baseline
    async fn remember_applied(
        &self,
        fs: &Arc<dyn FileSystem>,
        path: &SyncPath,
        kind: FileKind,
        origin: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let observed = fs.get_metadata(path).await?.last_modified;
        self.overlay
            .insert(path.clone(), OverlayEntry { origin, observed });
        self.baseline
            .lock()
            .expect("target baseline poisoned")
            .insert(
                path.clone(),
                BaselineEntry {
                    modified: origin,
                    kind,
                },
            );
        Ok(())
    }

    /// Drops overlay and baseline entries for a path and its subtree
    fn forget_subtree(&self, path: &SyncPath) {
        self.overlay.retain(|p, _| !p.starts_with(path));
        self.baseline
            .lock()
            .expect("target baseline poisoned")
            .retain(|p, _| !p.starts_with(path));
    }

    /// Origin-adjusted modification time for a path
    ///
    /// The overlay only speaks while the substrate mtime still matches
    /// the one the sync write produced; a local edit moves the mtime
    /// and invalidates the entry.
    fn effective_modified(&self, path: &SyncPath, observed: DateTime<Utc>) -> DateTime<Utc> {
        let hit = self.overlay.get(path).map(|e| *e.value());
        match hit {
            Some(entry) if entry.observed == observed => entry.origin,
            Some(_) => {
                self.overlay.remove(path);
                observed
            }
            None => observed,
        }
    }

    // ------------------------------------------------------------------
    // Snapshots and diffing (change detection)
    // ------------------------------------------------------------------

    /// Recursive, ignore-filtered view of the current tree
    pub(crate) async fn scan_snapshot(
        &self,
    ) -> Result<HashMap<SyncPath, BaselineEntry>, SyncError> {
        let fs = self.filesystem()?;
        let mut map = HashMap::new();
        let mut stack = vec![SyncPath::root()];

        while let Some(dir) = stack.pop() {
            for item in fs.list_directory(&dir).await? {
                if self.ignore.is_ignored(&item.path) {
                    continue;
                }
                let modified = self.effective_modified(&item.path, item.last_modified);
                map.insert(
                    item.path.clone(),
                    BaselineEntry {
                        modified,
                        kind: item.kind,
                    },
                );
                if item.kind.is_directory() {
                    stack.push(item.path);
                }
            }
        }
        Ok(map)
    }

    /// Classifies the differences between the baseline and `current`
    ///
    /// Creates and modifies come first (parents before children),
    /// deletes last (children before parents).
    pub(crate) async fn diff_against_baseline(
        &self,
        current: &HashMap<SyncPath, BaselineEntry>,
    ) -> Result<Vec<FileChangeInfo>, SyncError> {
        let baseline = self
            .baseline
            .lock()
            .expect("target baseline poisoned")
            .clone();

        let mut upserts: Vec<(&SyncPath, &BaselineEntry, ChangeType)> = Vec::new();
        for (path, entry) in current {
            match baseline.get(path) {
                None => upserts.push((path, entry, ChangeType::Create)),
                Some(prev) if prev.modified != entry.modified || prev.kind != entry.kind => {
                    upserts.push((path, entry, ChangeType::Modify))
                }
                Some(_) => {}
            }
        }
        upserts.sort_by(|a, b| a.0.cmp(b.0));

        let mut deleted: Vec<(&SyncPath, &BaselineEntry)> = baseline
            .iter()
            .filter(|(path, _)| !current.contains_key(*path))
            .collect();
        deleted.sort_by(|a, b| b.0.cmp(a.0));

        let mut changes = Vec::with_capacity(upserts.len() + deleted.len());
        for (path, entry, change_type) in upserts {
            changes.push(self.describe_change(path, entry, change_type).await?);
        }
        for (path, entry) in deleted {
            self.overlay.remove(path);
            changes.push(FileChangeInfo::delete(
                path.clone(),
                entry.kind,
                self.id.clone(),
            ));
        }
        Ok(changes)
    }

    async fn describe_change(
        &self,
        path: &SyncPath,
        entry: &BaselineEntry,
        change_type: ChangeType,
    ) -> Result<FileChangeInfo, SyncError> {
        let metadata = match entry.kind {
            FileKind::Directory => FileMetadata::directory(path.clone(), entry.modified),
            FileKind::File => {
                let mut metadata = self.filesystem()?.get_metadata(path).await?;
                metadata.last_modified = entry.modified;
                metadata
            }
        };
        Ok(FileChangeInfo::upsert(
            change_type,
            metadata,
            self.id.clone(),
        ))
    }

    /// Installs a new baseline snapshot
    pub(crate) fn replace_baseline(&self, snapshot: HashMap<SyncPath, BaselineEntry>) {
        *self.baseline.lock().expect("target baseline poisoned") = snapshot;
    }

    /// Marks the first bootstrap as finished
    pub(crate) fn set_initial_sync_complete(&self) {
        self.initial_sync_pending.store(false, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------

    /// Starts the change detector; only valid from idle
    pub fn watch(self: &Arc<Self>, callback: ChangeCallback) -> Result<(), SyncError> {
        if self.state() != TargetState::Idle {
            return Err(SyncError::WatchFailed {
                target: self.id.clone(),
                reason: format!("watch only valid from idle, target is {}", self.state()),
            });
        }

        let mut watch = self.watch.lock().expect("watch slot poisoned");
        if watch.is_some() {
            return Err(SyncError::WatchFailed {
                target: self.id.clone(),
                reason: "already watching".to_string(),
            });
        }

        let events = self.filesystem()?.take_event_feed();
        let token = CancellationToken::new();
        let task = tokio::spawn(detector::run_detector(
            self.clone(),
            callback,
            token.clone(),
            events,
        ));
        *watch = Some(WatchHandle { token, _task: task });
        info!(target = %self.id, "Change detection started");
        Ok(())
    }

    /// Stops the change detector
    ///
    /// The pending tick is cancelled; an in-flight cycle completes on
    /// its own.
    pub fn unwatch(&self) {
        if let Some(handle) = self.watch.lock().expect("watch slot poisoned").take() {
            handle.token.cancel();
            info!(target = %self.id, "Change detection stopped");
        }
        if self.state() == TargetState::Collecting {
            self.force_unlock_surface();
            let _ = self.transition(TargetState::Idle);
        }
    }
}

impl std::fmt::Debug for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTarget")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starsync_fs::MemoryFileSystem;

    fn path(p: &str) -> SyncPath {
        SyncPath::new(p).unwrap()
    }

    fn target(id: &str) -> SyncTarget {
        SyncTarget::new(
            TargetId::new(id).unwrap(),
            SubstrateKind::Memory,
            Arc::new(IgnoreMatcher::new()),
        )
    }

    async fn ready_target(id: &str, primary: bool) -> (SyncTarget, Arc<MemoryFileSystem>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let t = target(id);
        t.initialize(fs.clone(), primary).await.unwrap();
        (t, fs)
    }

    fn upsert(path_str: &str, bytes: &[u8], millis: i64, source: &str) -> (FileChangeInfo, FileContentStream) {
        let p = path(path_str);
        let metadata = FileMetadata {
            path: p.clone(),
            kind: FileKind::File,
            content_hash: starsync_fs::hash::digest_bytes(bytes),
            size_bytes: bytes.len() as u64,
            last_modified: DateTime::from_timestamp_millis(millis).unwrap(),
        };
        let change = FileChangeInfo::upsert(
            ChangeType::Create,
            metadata.clone(),
            TargetId::new(source).unwrap(),
        );
        let stream = FileContentStream::from_bytes(metadata, bytes.to_vec(), 64);
        (change, stream)
    }

    #[tokio::test]
    async fn test_initialize_rejects_substrate_mismatch() {
        let t = SyncTarget::new(
            TargetId::new("t").unwrap(),
            SubstrateKind::Native,
            Arc::new(IgnoreMatcher::new()),
        );
        let fs = Arc::new(MemoryFileSystem::new());
        let err = t.initialize(fs, false).await.unwrap_err();
        assert_eq!(err.code(), "INITIALIZATION_FAILED");
        assert_eq!(t.state(), TargetState::Error);
    }

    #[tokio::test]
    async fn test_initialize_roles() {
        let (primary, _) = ready_target("p", true).await;
        assert!(primary.is_primary());
        assert!(!primary.initial_sync_pending());
        assert_eq!(primary.state(), TargetState::Idle);

        let (secondary, _) = ready_target("s", false).await;
        assert_eq!(secondary.role(), Some(TargetRole::Secondary));
        assert!(secondary.initial_sync_pending());
    }

    #[tokio::test]
    async fn test_apply_create_from_idle_self_contained() {
        let (t, fs) = ready_target("t", false).await;
        let (change, stream) = upsert("/a.txt", b"hello", 1_000, "src");

        let conflict = t.apply_file_change(&change, Some(stream)).await.unwrap();
        assert!(conflict.is_none());
        assert_eq!(fs.read_file(&path("/a.txt")).await.unwrap(), b"hello");
        // The self-opened cycle is closed again
        assert_eq!(t.state(), TargetState::Idle);
        assert!(!fs.state().lock.locked);
    }

    #[tokio::test]
    async fn test_apply_creates_missing_parent_chain() {
        let (t, fs) = ready_target("t", false).await;
        let (change, stream) = upsert("/deep/nested/a.txt", b"x", 1_000, "src");

        t.apply_file_change(&change, Some(stream)).await.unwrap();
        assert!(fs.exists(&path("/deep/nested/a.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_reports_origin_timestamp() {
        let (t, _) = ready_target("t", false).await;
        let (change, stream) = upsert("/a.txt", b"hello", 1_234, "src");

        t.apply_file_change(&change, Some(stream)).await.unwrap();

        let metadata = t.get_metadata(&[path("/a.txt")]).await.unwrap();
        assert_eq!(metadata[0].last_modified_millis(), 1_234);
    }

    #[tokio::test]
    async fn test_sync_origin_write_produces_no_spurious_change() {
        let (t, _) = ready_target("t", false).await;
        let (change, stream) = upsert("/a.txt", b"hello", 1_000, "src");
        t.apply_file_change(&change, Some(stream)).await.unwrap();

        let current = t.scan_snapshot().await.unwrap();
        let changes = t.diff_against_baseline(&current).await.unwrap();
        assert!(changes.is_empty(), "unexpected changes: {changes:?}");
    }

    #[tokio::test]
    async fn test_local_edit_after_sync_is_detected() {
        let (t, fs) = ready_target("t", false).await;
        let (change, stream) = upsert("/a.txt", b"hello", 1_000, "src");
        t.apply_file_change(&change, Some(stream)).await.unwrap();

        // A user edit moves the substrate mtime, invalidating the overlay
        tokio::time::sleep(Duration::from_millis(5)).await;
        fs.write_file(&path("/a.txt"), b"edited", false).await.unwrap();

        let current = t.scan_snapshot().await.unwrap();
        let changes = t.diff_against_baseline(&current).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Modify);
        assert_eq!(changes[0].path.as_str(), "/a.txt");
    }

    #[tokio::test]
    async fn test_newer_destination_wins_with_conflict() {
        let (t, fs) = ready_target("t", false).await;
        // The destination's copy is stamped now
        fs.write_file(&path("/a.txt"), b"local", false).await.unwrap();

        // The incoming change claims an ancient timestamp
        let (change, stream) = upsert("/a.txt", b"remote", 1_000, "src");
        let conflict = t.apply_file_change(&change, Some(stream)).await.unwrap();

        let conflict = conflict.expect("expected a conflict");
        assert_eq!(conflict.path.as_str(), "/a.txt");
        assert_eq!(conflict.target_id.as_str(), "t");
        assert_eq!(conflict.source_target_id.as_str(), "src");
        // Nothing was written
        assert_eq!(fs.read_file(&path("/a.txt")).await.unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_delete_absent_path_is_noop() {
        let (t, _) = ready_target("t", false).await;
        let change = FileChangeInfo::delete(path("/ghost"), FileKind::File, TargetId::new("src").unwrap());
        let conflict = t.apply_file_change(&change, None).await.unwrap();
        assert!(conflict.is_none());
        assert_eq!(t.state(), TargetState::Idle);
    }

    #[tokio::test]
    async fn test_delete_directory_recursive() {
        let (t, fs) = ready_target("t", false).await;
        fs.create_directory(&path("/d"), false, false).await.unwrap();
        fs.write_file(&path("/d/a.txt"), b"x", false).await.unwrap();

        let change = FileChangeInfo::delete(path("/d"), FileKind::Directory, TargetId::new("src").unwrap());
        t.apply_file_change(&change, None).await.unwrap();
        assert!(!fs.exists(&path("/d")).await.unwrap());
        assert!(!fs.exists(&path("/d/a.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_from_error_state_is_invalid() {
        let (t, _) = ready_target("t", false).await;
        t.set_error();

        let (change, stream) = upsert("/a.txt", b"x", 1_000, "src");
        let err = t.apply_file_change(&change, Some(stream)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_OPERATION");
    }

    #[tokio::test]
    async fn test_missing_content_stream_fails_apply() {
        let (t, _) = ready_target("t", false).await;
        let (change, _stream) = upsert("/a.txt", b"x", 1_000, "src");

        let err = t.apply_file_change(&change, None).await.unwrap_err();
        assert_eq!(err.code(), "APPLY_FAILED");
        assert_eq!(t.state(), TargetState::Error);
    }

    #[tokio::test]
    async fn test_recover_returns_to_idle() {
        let (t, _) = ready_target("t", false).await;
        t.set_error();
        t.recover().unwrap();
        assert_eq!(t.state(), TargetState::Idle);
    }

    #[tokio::test]
    async fn test_cycle_bracketing() {
        let (t, fs) = ready_target("t", false).await;

        t.notify_incoming_changes(&[path("/a.txt")]).await.unwrap();
        assert_eq!(t.state(), TargetState::Collecting);
        assert!(fs.state().lock.locked);

        let (change, stream) = upsert("/a.txt", b"x", 1_000, "src");
        t.apply_file_change(&change, Some(stream)).await.unwrap();
        // Joined the open cycle instead of closing it
        assert_eq!(t.state(), TargetState::Syncing);
        assert!(fs.state().lock.locked);

        t.sync_complete().await.unwrap();
        assert_eq!(t.state(), TargetState::Idle);
        assert!(!fs.state().lock.locked);
    }

    #[tokio::test]
    async fn test_snapshot_skips_ignored_paths() {
        let ignore = Arc::new(IgnoreMatcher::new());
        let t = SyncTarget::new(TargetId::new("t").unwrap(), SubstrateKind::Memory, ignore);
        let fs = Arc::new(MemoryFileSystem::new());
        t.initialize(fs.clone(), true).await.unwrap();

        fs.create_directory(&path("/.git"), false, false).await.unwrap();
        fs.write_file(&path("/.git/HEAD"), b"ref", false).await.unwrap();
        fs.write_file(&path("/a.txt"), b"x", false).await.unwrap();

        let snapshot = t.scan_snapshot().await.unwrap();
        assert!(snapshot.contains_key(&path("/a.txt")));
        assert!(!snapshot.contains_key(&path("/.git")));
        assert!(!snapshot.contains_key(&path("/.git/HEAD")));
    }

    #[tokio::test]
    async fn test_diff_orders_deletes_children_first() {
        let (t, fs) = ready_target("t", true).await;
        fs.create_directory(&path("/d"), false, false).await.unwrap();
        fs.write_file(&path("/d/a.txt"), b"x", false).await.unwrap();

        let snapshot = t.scan_snapshot().await.unwrap();
        t.replace_baseline(snapshot);

        fs.delete_item(&path("/d"), true, false).await.unwrap();
        let current = t.scan_snapshot().await.unwrap();
        let changes = t.diff_against_baseline(&current).await.unwrap();

        let paths: Vec<_> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["/d/a.txt", "/d"]);
        assert!(changes.iter().all(|c| c.is_delete()));
    }
}
