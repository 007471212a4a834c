//! File sync manager - orchestration of the star topology
//!
//! Owns one primary target and N secondaries. Change batches flow in
//! through [`FileSyncManager::handle_target_changes`]:
//!
//! - Primary-origin changes fan out to every secondary in insertion
//!   order; one secondary's failure never blocks the others.
//! - Secondary-origin changes must be accepted by the primary first.
//!   If the primary refuses, the manager enters `conflict` and retains
//!   the batch until the operator confirms or rejects it.
//!
//! Bootstrap (and reinitialize) wholesale-replaces a destination's
//! contents with the primary's: delete everything, then recreate
//! everything.

use std::sync::{Arc, Mutex, Weak};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use starsync_core::config::Config;
use starsync_core::domain::{
    ChangeType, FileChangeInfo, FileConflict, FileSystemItem, ManagerState, SyncPath, TargetId,
    TargetState, MANAGER_TRANSITIONS,
};
use starsync_fs::FileContentStream;
use starsync_ignore::IgnoreMatcher;

use crate::error::SyncError;
use crate::pending::PendingSync;
use crate::progress::{
    instrument_stream, ListenerId, ProgressBroadcaster, ProgressEvent, ProgressListener, SyncPhase,
};
use crate::target::{ChangeCallback, SyncTarget, TargetRole};

/// Outcome of applying one change set to one destination
#[derive(Debug)]
pub struct ApplyResult {
    /// The destination the changes were applied to
    pub target_id: TargetId,
    /// True when every change landed without error or conflict
    pub success: bool,
    /// First failure encountered, if any
    pub error: Option<String>,
    /// Changes that were applied successfully, in input order
    pub applied_changes: Vec<FileChangeInfo>,
    /// Conflicts raised by the destination (newer local copies)
    pub conflicts: Vec<FileConflict>,
}

/// Orchestrates replication between one primary and N secondaries
pub struct FileSyncManager {
    config: Config,
    ignore: Arc<IgnoreMatcher>,
    state: Mutex<ManagerState>,
    primary: Mutex<Option<Arc<SyncTarget>>>,
    secondaries: Mutex<Vec<Arc<SyncTarget>>>,
    pending: Mutex<Option<PendingSync>>,
    progress: Arc<ProgressBroadcaster>,
    /// Serializes propagation cycles from concurrent detectors
    cycle_gate: tokio::sync::Mutex<()>,
    self_ref: Mutex<Weak<FileSyncManager>>,
}

impl FileSyncManager {
    /// Creates an uninitialized manager
    ///
    /// The ignore matcher is built from the configured user patterns;
    /// share it with the targets via [`FileSyncManager::ignore`].
    pub fn new(config: Config) -> Arc<Self> {
        let ignore = Arc::new(IgnoreMatcher::with_patterns(config.ignore.patterns.clone()));
        Arc::new_cyclic(|weak| Self {
            config,
            ignore,
            state: Mutex::new(ManagerState::Uninitialized),
            primary: Mutex::new(None),
            secondaries: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            progress: Arc::new(ProgressBroadcaster::new()),
            cycle_gate: tokio::sync::Mutex::new(()),
            self_ref: Mutex::new(weak.clone()),
        })
    }

    /// The shared ignore matcher
    pub fn ignore(&self) -> Arc<IgnoreMatcher> {
        self.ignore.clone()
    }

    /// The configuration this manager runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current manager state
    pub fn state(&self) -> ManagerState {
        *self.state.lock().expect("manager state poisoned")
    }

    fn transition(&self, to: ManagerState) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("manager state poisoned");
        if let Err(err) = MANAGER_TRANSITIONS.check(*state, to) {
            error!(from = %*state, %to, "Invalid manager transition, driving to error");
            *state = ManagerState::Error;
            return Err(err.into());
        }
        *state = to;
        Ok(())
    }

    fn force_state(&self, to: ManagerState) {
        *self.state.lock().expect("manager state poisoned") = to;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validates registered targets and becomes ready
    pub fn initialize(&self) -> Result<(), SyncError> {
        for target in self.all_targets() {
            if target.state() == TargetState::Error {
                return Err(SyncError::InitializationFailed(format!(
                    "target {} is in error state",
                    target.id()
                )));
            }
        }
        self.transition(ManagerState::Ready)?;
        info!("Sync manager ready");
        Ok(())
    }

    /// Unwatches everything and returns to uninitialized
    pub async fn dispose(&self) {
        if let Some(primary) = self.primary.lock().expect("primary slot poisoned").take() {
            primary.unwatch();
        }
        for secondary in self
            .secondaries
            .lock()
            .expect("secondaries poisoned")
            .drain(..)
        {
            secondary.unwatch();
        }
        *self.pending.lock().expect("pending poisoned") = None;
        self.force_state(ManagerState::Uninitialized);
        info!("Sync manager disposed");
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Admits a target into the topology
    ///
    /// A new primary bootstraps every existing secondary; a new
    /// secondary is bootstrapped from the primary if one exists.
    /// Watching starts once bootstrap has finished.
    pub async fn register_target(
        &self,
        target: Arc<SyncTarget>,
        role: TargetRole,
    ) -> Result<(), SyncError> {
        match self.state() {
            ManagerState::Uninitialized | ManagerState::Ready => {}
            _ => return Err(SyncError::SyncInProgress),
        }

        match target.state() {
            TargetState::Idle => {}
            TargetState::Error => {
                return Err(SyncError::InitializationFailed(format!(
                    "target {} is in error state",
                    target.id()
                )))
            }
            other => {
                return Err(SyncError::InitializationFailed(format!(
                    "target {} must be initialized before registration (state: {other})",
                    target.id()
                )))
            }
        }

        if target.role() != Some(role) {
            return Err(SyncError::InitializationFailed(format!(
                "target {} was initialized as {:?}, registered as {role}",
                target.id(),
                target.role()
            )));
        }

        if self.find_target(target.id()).is_some() {
            return Err(SyncError::TargetAlreadyExists(target.id().clone()));
        }

        match role {
            TargetRole::Primary => {
                {
                    let mut primary = self.primary.lock().expect("primary slot poisoned");
                    if let Some(existing) = primary.as_ref() {
                        return Err(SyncError::PrimaryTargetExists(existing.id().clone()));
                    }
                    *primary = Some(target.clone());
                }
                info!(target = %target.id(), "Primary target registered");

                for secondary in self.secondaries() {
                    self.bootstrap(&secondary).await?;
                }
                target.watch(self.change_callback())?;
            }
            TargetRole::Secondary => {
                self.secondaries
                    .lock()
                    .expect("secondaries poisoned")
                    .push(target.clone());
                info!(target = %target.id(), "Secondary target registered");

                if self.primary_target().is_some() {
                    self.bootstrap(&target).await?;
                }
                target.watch(self.change_callback())?;
            }
        }
        Ok(())
    }

    /// Removes a target from the topology
    pub async fn unregister_target(&self, id: &TargetId) -> Result<(), SyncError> {
        {
            let mut primary = self.primary.lock().expect("primary slot poisoned");
            if primary.as_ref().map(|p| p.id() == id).unwrap_or(false) {
                let target = primary.take().expect("checked above");
                target.unwatch();
                info!(target = %id, "Primary target unregistered");
                return Ok(());
            }
        }

        let mut secondaries = self.secondaries.lock().expect("secondaries poisoned");
        match secondaries.iter().position(|s| s.id() == id) {
            Some(index) => {
                let target = secondaries.remove(index);
                drop(secondaries);
                target.unwatch();
                info!(target = %id, "Secondary target unregistered");
                Ok(())
            }
            None => Err(SyncError::TargetNotFound(id.clone())),
        }
    }

    // ------------------------------------------------------------------
    // Change propagation
    // ------------------------------------------------------------------

    /// Entry point for a source target's detected change batch
    pub async fn handle_target_changes(
        &self,
        source_id: &TargetId,
        changes: Vec<FileChangeInfo>,
    ) -> Result<(), SyncError> {
        let changes: Vec<FileChangeInfo> = changes
            .into_iter()
            .filter(|c| !self.ignore.is_ignored(&c.path))
            .collect();
        if changes.is_empty() {
            return Ok(());
        }

        let _gate = self.cycle_gate.lock().await;

        let primary = self.primary_target().ok_or(SyncError::NoPrimaryTarget)?;
        let source = self
            .find_target(source_id)
            .ok_or_else(|| SyncError::TargetNotFound(source_id.clone()))?;

        match self.state() {
            ManagerState::Ready => self.transition(ManagerState::Syncing)?,
            _ => return Err(SyncError::SyncInProgress),
        }

        info!(
            source = %source_id,
            count = changes.len(),
            "Propagating change batch"
        );

        if Arc::ptr_eq(&source, &primary) {
            self.propagate_from_primary(&primary, &changes).await
        } else {
            self.propagate_from_secondary(&source, &primary, &changes)
                .await
        }
    }

    /// Primary-origin fan-out: every secondary, failures isolated
    async fn propagate_from_primary(
        &self,
        primary: &Arc<SyncTarget>,
        changes: &[FileChangeInfo],
    ) -> Result<(), SyncError> {
        let mut results = Vec::new();
        for secondary in self.secondaries() {
            let result = self
                .apply_changes_to_target(&secondary, primary, changes, false)
                .await;
            if !result.success {
                warn!(
                    destination = %result.target_id,
                    error = ?result.error,
                    "Secondary did not accept change batch"
                );
            }
            results.push(result);
        }

        self.update_pending(primary.id(), &results, changes);
        // Per-destination failure is not a global conflict when the
        // primary is the source
        self.transition(ManagerState::Ready)?;
        Ok(())
    }

    /// Secondary-origin flow: primary first, then the other secondaries
    async fn propagate_from_secondary(
        &self,
        source: &Arc<SyncTarget>,
        primary: &Arc<SyncTarget>,
        changes: &[FileChangeInfo],
    ) -> Result<(), SyncError> {
        let primary_result = self
            .apply_changes_to_target(primary, source, changes, false)
            .await;

        if !primary_result.success {
            warn!(
                source = %source.id(),
                error = ?primary_result.error,
                conflicts = primary_result.conflicts.len(),
                "Primary refused secondary-origin changes, entering conflict"
            );
            let mut record = PendingSync::new(source.id().clone());
            record.record_failure(primary.id().clone(), changes.to_vec());
            *self.pending.lock().expect("pending poisoned") = Some(record);
            self.transition(ManagerState::Conflict)?;
            return Ok(());
        }

        let mut results = vec![primary_result];
        for secondary in self.secondaries() {
            if secondary.id() == source.id() {
                continue;
            }
            results.push(
                self.apply_changes_to_target(&secondary, source, changes, false)
                    .await,
            );
        }

        self.update_pending(source.id(), &results, changes);
        self.transition(ManagerState::Ready)?;
        Ok(())
    }

    /// Applies `changes` to `dest` in batches of at most max_batch_size
    ///
    /// Content for each batch is resolved and applied concurrently;
    /// batches run in order, and the first failure stops the remaining
    /// batches for this destination.
    ///
    /// With `join_existing_cycle` the caller has already opened the
    /// destination's sync cycle (bootstrap does this) and keeps
    /// ownership of it. Otherwise this method waits for the
    /// destination to go idle - a detector cycle in flight on it must
    /// finish first - and opens its own.
    async fn apply_changes_to_target(
        &self,
        dest: &Arc<SyncTarget>,
        src: &Arc<SyncTarget>,
        changes: &[FileChangeInfo],
        join_existing_cycle: bool,
    ) -> ApplyResult {
        let total = changes.len();
        let mut applied = Vec::new();
        let mut conflicts = Vec::new();
        let mut first_error: Option<String> = None;

        let owns_cycle = !join_existing_cycle;
        if owns_cycle {
            let paths: Vec<SyncPath> = changes.iter().map(|c| c.path.clone()).collect();
            if let Err(err) = self.open_cycle(dest, &paths).await {
                // Lock contention is fatal to the cycle, not the target
                self.progress.emit(ProgressEvent::Error {
                    source_target_id: src.id().clone(),
                    target_id: dest.id().clone(),
                    current_file: None,
                    error: err.to_string(),
                    phase: SyncPhase::Collecting,
                });
                return ApplyResult {
                    target_id: dest.id().clone(),
                    success: false,
                    error: Some(err.to_string()),
                    applied_changes: applied,
                    conflicts,
                };
            }
        }

        'batches: for batch in changes.chunks(self.config.engine.max_batch_size.max(1)) {
            for change in batch {
                self.progress.emit(ProgressEvent::Syncing {
                    source_target_id: src.id().clone(),
                    target_id: dest.id().clone(),
                    total_files: total,
                    synced_files: applied.len(),
                    current_file: change.path.clone(),
                });
            }

            let futures = batch.iter().map(|change| self.apply_one(dest, src, change));
            let results = join_all(futures).await;

            for (change, result) in batch.iter().zip(results) {
                match result {
                    Ok(None) => {
                        applied.push(change.clone());
                    }
                    Ok(Some(conflict)) => {
                        self.progress.emit(ProgressEvent::Error {
                            source_target_id: src.id().clone(),
                            target_id: dest.id().clone(),
                            current_file: Some(change.path.clone()),
                            error: format!("destination copy of {} is newer", change.path),
                            phase: SyncPhase::Applying,
                        });
                        conflicts.push(conflict);
                    }
                    Err((phase, err)) => {
                        self.progress.emit(ProgressEvent::Error {
                            source_target_id: src.id().clone(),
                            target_id: dest.id().clone(),
                            current_file: Some(change.path.clone()),
                            error: err.to_string(),
                            phase,
                        });
                        if first_error.is_none() {
                            first_error = Some(err.to_string());
                        }
                    }
                }
            }

            if first_error.is_some() {
                dest.set_error();
                break 'batches;
            }
        }

        if owns_cycle {
            if dest.state() == TargetState::Error {
                dest.force_unlock_surface();
            } else {
                let _ = dest.sync_complete().await;
            }
        }

        self.progress.emit(ProgressEvent::Completing {
            source_target_id: src.id().clone(),
            target_id: dest.id().clone(),
            successful_files: applied.len(),
            failed_files: total - applied.len(),
        });

        ApplyResult {
            target_id: dest.id().clone(),
            success: first_error.is_none() && conflicts.is_empty(),
            error: first_error,
            applied_changes: applied,
            conflicts,
        }
    }

    /// Opens a sync cycle on `dest`, waiting out a detector cycle
    ///
    /// Bounded by the configured lock timeout; a destination that
    /// never goes idle fails the cycle, not the target.
    async fn open_cycle(
        &self,
        dest: &Arc<SyncTarget>,
        paths: &[SyncPath],
    ) -> Result<(), SyncError> {
        let deadline = tokio::time::Instant::now() + self.config.engine.lock_timeout();
        loop {
            match dest.state() {
                TargetState::Idle => match dest.notify_incoming_changes(paths).await {
                    Ok(()) => return Ok(()),
                    Err(SyncError::Fs(starsync_fs::FsError::Locked(_)))
                        if tokio::time::Instant::now() < deadline =>
                    {
                        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                    }
                    Err(err) => return Err(err),
                },
                TargetState::Collecting | TargetState::Syncing
                    if tokio::time::Instant::now() < deadline =>
                {
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                }
                other => {
                    return Err(SyncError::InvalidState {
                        from: other.to_string(),
                        to: TargetState::Collecting.to_string(),
                    })
                }
            }
        }
    }

    /// Resolves content and applies a single change
    async fn apply_one(
        &self,
        dest: &Arc<SyncTarget>,
        src: &Arc<SyncTarget>,
        change: &FileChangeInfo,
    ) -> Result<Option<FileConflict>, (SyncPhase, SyncError)> {
        let content = if change.is_delete() {
            Some(FileContentStream::empty(change.metadata.clone()))
        } else if change.metadata.kind.is_directory() {
            None
        } else {
            let stream = src
                .get_file_content(&change.path)
                .await
                .map_err(|err| (SyncPhase::Streaming, err))?;
            Some(instrument_stream(
                stream,
                self.progress.clone(),
                src.id().clone(),
                dest.id().clone(),
            ))
        };

        dest.apply_file_change(change, content)
            .await
            .map_err(|err| (SyncPhase::Applying, err))
    }

    /// Applies the pending rules after a fan-out cycle
    fn update_pending(
        &self,
        source_id: &TargetId,
        results: &[ApplyResult],
        changes: &[FileChangeInfo],
    ) {
        let failures: Vec<&ApplyResult> = results.iter().filter(|r| !r.success).collect();
        let mut pending = self.pending.lock().expect("pending poisoned");

        if failures.is_empty() {
            if pending.take().is_some() {
                debug!("All destinations succeeded, pending sync cleared");
            }
            return;
        }

        // A pending from a different source is superseded
        let keep_existing = matches!(
            pending.as_ref(),
            Some(existing) if existing.source_target_id() == source_id
        );
        if !keep_existing {
            *pending = Some(PendingSync::new(source_id.clone()));
        }
        let record = pending.as_mut().expect("pending record present");
        for failure in failures {
            record.record_failure(failure.target_id.clone(), changes.to_vec());
        }
    }

    // ------------------------------------------------------------------
    // Bootstrap / reinitialize
    // ------------------------------------------------------------------

    /// Bootstraps `dest`, driving the manager to error on failure
    async fn bootstrap(&self, dest: &Arc<SyncTarget>) -> Result<(), SyncError> {
        match self.full_sync_from_primary(dest).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(destination = %dest.id(), error = %err, "Bootstrap failed");
                self.force_state(ManagerState::Error);
                Err(err)
            }
        }
    }

    /// Wholesale replace of `dest`'s contents with the primary's
    async fn full_sync_from_primary(&self, dest: &Arc<SyncTarget>) -> Result<(), SyncError> {
        let primary = self.primary_target().ok_or(SyncError::NoPrimaryTarget)?;
        info!(destination = %dest.id(), "Full sync from primary starting");

        let primary_items = self.collect_tree(&primary).await?;
        let all_paths: Vec<SyncPath> = primary_items.iter().map(|i| i.path.clone()).collect();

        // A watched destination's detector may hold the lock briefly
        self.open_cycle(dest, &all_paths).await?;

        let outcome: Result<(), SyncError> = async {
            // Clear the destination, children before parents
            let mut dest_items = self.collect_tree(dest).await?;
            dest_items.sort_by(|a, b| b.path.depth().cmp(&a.path.depth()));
            let deletes: Vec<FileChangeInfo> = dest_items
                .into_iter()
                .map(|item| FileChangeInfo::delete(item.path, item.kind, primary.id().clone()))
                .collect();
            if !deletes.is_empty() {
                let result = self
                    .apply_changes_to_target(dest, &primary, &deletes, true)
                    .await;
                if !result.success {
                    return Err(SyncError::ApplyFailed {
                        target: dest.id().clone(),
                        reason: result
                            .error
                            .unwrap_or_else(|| "bootstrap deletes refused".to_string()),
                    });
                }
            }

            // Recreate the primary's tree, parents before children
            let mut ordered = primary_items;
            ordered.sort_by(|a, b| a.path.depth().cmp(&b.path.depth()).then(a.path.cmp(&b.path)));
            let mut creates = Vec::with_capacity(ordered.len());
            for item in ordered {
                let metadata = primary.get_metadata(std::slice::from_ref(&item.path)).await?;
                let metadata = metadata.into_iter().next().ok_or_else(|| {
                    SyncError::SourceNotAvailable(primary.id().clone())
                })?;
                creates.push(FileChangeInfo::upsert(
                    ChangeType::Create,
                    metadata,
                    primary.id().clone(),
                ));
            }
            if !creates.is_empty() {
                let result = self
                    .apply_changes_to_target(dest, &primary, &creates, true)
                    .await;
                if !result.success {
                    return Err(SyncError::ApplyFailed {
                        target: dest.id().clone(),
                        reason: result
                            .error
                            .unwrap_or_else(|| "bootstrap creates refused".to_string()),
                    });
                }
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                dest.sync_complete().await?;
                dest.set_initial_sync_complete();
                info!(destination = %dest.id(), "Full sync from primary complete");
                Ok(())
            }
            Err(err) => {
                dest.set_error();
                dest.force_unlock_surface();
                Err(err)
            }
        }
    }

    /// Operator-triggered recovery: rebuild one secondary from the primary
    pub async fn reinitialize_target(&self, id: &TargetId) -> Result<(), SyncError> {
        let target = self
            .find_target(id)
            .ok_or_else(|| SyncError::TargetNotFound(id.clone()))?;
        if self
            .primary_target()
            .map(|p| p.id() == id)
            .unwrap_or(false)
        {
            return Err(SyncError::InitializationFailed(
                "the primary is authoritative and cannot be reinitialized".to_string(),
            ));
        }

        if target.state() == TargetState::Error {
            target.recover()?;
        }
        self.bootstrap(&target).await?;

        if self.state() == ManagerState::Error {
            self.transition(ManagerState::Ready)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conflict resolution
    // ------------------------------------------------------------------

    /// The retained pending record, if any
    pub fn get_pending_sync(&self) -> Option<PendingSync> {
        self.pending.lock().expect("pending poisoned").clone()
    }

    /// Deduplicated pending changes across all targets (last wins)
    pub fn get_pending_changes(&self) -> Result<Vec<FileChangeInfo>, SyncError> {
        self.pending
            .lock()
            .expect("pending poisoned")
            .as_ref()
            .map(|p| p.deduplicated_changes())
            .ok_or(SyncError::NoPendingSync)
    }

    /// Content for one pending change, streamed from its source target
    pub async fn get_pending_change_content(
        &self,
        path: &SyncPath,
    ) -> Result<FileContentStream, SyncError> {
        let pending = self
            .get_pending_sync()
            .ok_or(SyncError::NoPendingSync)?;
        let source = self
            .find_target(pending.source_target_id())
            .ok_or_else(|| SyncError::SourceNotAvailable(pending.source_target_id().clone()))?;

        if !pending
            .deduplicated_changes()
            .iter()
            .any(|c| &c.path == path)
        {
            return Err(SyncError::Fs(starsync_fs::FsError::NotFound(path.clone())));
        }
        source.get_file_content(path).await
    }

    /// Replays the pending changes onto the primary and fans out
    ///
    /// On success every other secondary is rebuilt from the updated
    /// primary, the pending record is cleared, and the manager returns
    /// to ready.
    pub async fn confirm_primary_sync(&self) -> Result<(), SyncError> {
        let pending = self
            .get_pending_sync()
            .ok_or(SyncError::NoPendingSync)?;
        let primary = self.primary_target().ok_or(SyncError::NoPrimaryTarget)?;
        let source = self
            .find_target(pending.source_target_id())
            .ok_or_else(|| SyncError::SourceNotAvailable(pending.source_target_id().clone()))?;

        if primary.state() == TargetState::Error {
            primary.recover()?;
        }

        let mut changes = pending.deduplicated_changes();
        // Restamp so a newer primary copy cannot refuse the replay
        let now = chrono::Utc::now();
        for change in &mut changes {
            change.metadata.last_modified = now;
        }
        info!(count = changes.len(), "Replaying pending changes onto primary");
        let result = self
            .apply_changes_to_target(&primary, &source, &changes, false)
            .await;
        if !result.success {
            return Err(SyncError::ApplyFailed {
                target: primary.id().clone(),
                reason: result
                    .error
                    .unwrap_or_else(|| "primary refused the replay".to_string()),
            });
        }

        for secondary in self.secondaries() {
            if secondary.id() == pending.source_target_id() {
                continue;
            }
            if secondary.state() == TargetState::Error {
                secondary.recover()?;
            }
            self.bootstrap(&secondary).await?;
        }

        *self.pending.lock().expect("pending poisoned") = None;
        if self.state() == ManagerState::Conflict {
            self.transition(ManagerState::Ready)?;
        }
        info!("Pending sync confirmed and fanned out");
        Ok(())
    }

    /// Discards the pending changes and returns to ready
    pub fn reject_pending_sync(&self) -> Result<(), SyncError> {
        {
            let mut pending = self.pending.lock().expect("pending poisoned");
            if pending.is_none() {
                return Err(SyncError::NoPendingSync);
            }
            *pending = None;
        }
        if self.state() == ManagerState::Conflict {
            self.transition(ManagerState::Ready)?;
        }
        info!("Pending sync rejected");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Progress listeners
    // ------------------------------------------------------------------

    /// Registers a progress listener
    pub fn add_progress_listener(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        self.progress.add(listener)
    }

    /// Removes a previously registered listener
    pub fn remove_progress_listener(&self, id: ListenerId) {
        self.progress.remove(id);
    }

    // ------------------------------------------------------------------
    // Topology helpers
    // ------------------------------------------------------------------

    /// The registered primary, if any
    pub fn primary_target(&self) -> Option<Arc<SyncTarget>> {
        self.primary.lock().expect("primary slot poisoned").clone()
    }

    /// The registered secondaries, in insertion order
    pub fn secondaries(&self) -> Vec<Arc<SyncTarget>> {
        self.secondaries
            .lock()
            .expect("secondaries poisoned")
            .clone()
    }

    /// Looks a target up by id across the whole topology
    pub fn find_target(&self, id: &TargetId) -> Option<Arc<SyncTarget>> {
        if let Some(primary) = self.primary_target() {
            if primary.id() == id {
                return Some(primary);
            }
        }
        self.secondaries().into_iter().find(|s| s.id() == id)
    }

    fn all_targets(&self) -> Vec<Arc<SyncTarget>> {
        let mut targets = self.secondaries();
        if let Some(primary) = self.primary_target() {
            targets.push(primary);
        }
        targets
    }

    /// Recursive, ignore-filtered enumeration of a target's tree
    async fn collect_tree(
        &self,
        target: &Arc<SyncTarget>,
    ) -> Result<Vec<FileSystemItem>, SyncError> {
        let mut items = Vec::new();
        let mut stack = vec![SyncPath::root()];
        while let Some(dir) = stack.pop() {
            for item in target.list_directory(&dir).await? {
                if self.ignore.is_ignored(&item.path) {
                    continue;
                }
                if item.kind.is_directory() {
                    stack.push(item.path.clone());
                }
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Callback handed to targets; holds only a weak back-edge
    fn change_callback(&self) -> ChangeCallback {
        let weak = self.self_ref.lock().expect("self ref poisoned").clone();
        Arc::new(move |source, changes| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = manager.handle_target_changes(&source, changes).await {
                    warn!(source = %source, error = %err, "Change propagation failed");
                }
            })
        })
    }
}

impl std::fmt::Debug for FileSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSyncManager")
            .field("state", &self.state())
            .field("secondaries", &self.secondaries().len())
            .finish()
    }
}
