//! Change detector - debounced batching over snapshot diffs
//!
//! A single cooperative loop per watched target. Each tick opens a
//! sync cycle on the target, snapshots the tree, diffs it against the
//! baseline, and publishes the batch through the target's callback.
//!
//! ```text
//! substrate events ──→ debounce buffer ──┐
//!                                        ▼
//!                    poll timer ──→  run_cycle  ──→  callback(batch)
//! ```
//!
//! Substrate events (where the adapter provides them) only wake the
//! loop early; detection itself always re-snapshots, so the polling
//! timer alone is a complete fallback. Errors in a cycle abort that
//! cycle only - the next tick always runs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use starsync_core::domain::{SyncPath, TargetState};

use crate::error::SyncError;
use crate::target::{ChangeCallback, SyncTarget};

/// Detector loop, spawned by [`SyncTarget::watch`]
pub(crate) async fn run_detector(
    target: Arc<SyncTarget>,
    callback: ChangeCallback,
    token: CancellationToken,
    mut events: Option<mpsc::Receiver<SyncPath>>,
) {
    let mut interval = tokio::time::interval(target.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        target = %target.id(),
        poll_ms = target.poll_interval.as_millis() as u64,
        event_feed = events.is_some(),
        "Change detector starting"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            _ = interval.tick() => {
                run_cycle(&target, &callback).await;
            }

            event = recv_event(&mut events) => {
                match event {
                    Some(path) => {
                        debug!(target = %target.id(), %path, "Substrate event, debouncing");
                        // Let the burst settle, then fold the buffered
                        // events into one early tick
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(target.debounce) => {}
                        }
                        if let Some(rx) = events.as_mut() {
                            while rx.try_recv().is_ok() {}
                        }
                        run_cycle(&target, &callback).await;
                        interval.reset();
                    }
                    None => {
                        debug!(target = %target.id(), "Event feed closed, polling only");
                        events = None;
                    }
                }
            }
        }
    }

    info!(target = %target.id(), "Change detector stopped");
}

async fn recv_event(events: &mut Option<mpsc::Receiver<SyncPath>>) -> Option<SyncPath> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// One detection cycle
///
/// Skips without side effects while the target is mid-cycle, errored,
/// or a secondary still awaiting bootstrap.
pub(crate) async fn run_cycle(target: &Arc<SyncTarget>, callback: &ChangeCallback) {
    match target.state() {
        TargetState::Idle => {}
        other => {
            debug!(target = %target.id(), state = %other, "Skipping detection tick");
            return;
        }
    }
    if target.initial_sync_pending() {
        debug!(target = %target.id(), "Initial bootstrap pending, skipping tick");
        return;
    }

    // Lock contention aborts this cycle only
    if let Err(err) = target.notify_incoming_changes(&[]).await {
        debug!(target = %target.id(), error = %err, "Cannot open cycle, skipping tick");
        return;
    }

    if let Err(err) = detect_and_publish(target, callback).await {
        warn!(target = %target.id(), error = %err, "Detection cycle failed");
        let _ = target.sync_complete().await;
    }
}

async fn detect_and_publish(
    target: &Arc<SyncTarget>,
    callback: &ChangeCallback,
) -> Result<(), SyncError> {
    let current = target.scan_snapshot().await?;
    let changes = target.diff_against_baseline(&current).await?;

    if changes.is_empty() {
        target.replace_baseline(current);
        target.sync_complete().await?;
        return Ok(());
    }

    info!(
        target = %target.id(),
        count = changes.len(),
        "Publishing change batch"
    );
    target.ensure_syncing()?;
    callback(target.id().clone(), changes).await;
    target.replace_baseline(current);
    target.sync_complete().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use starsync_core::config::EngineConfig;
    use starsync_core::domain::{ChangeType, FileChangeInfo, TargetId};
    use starsync_fs::{FileSystem, MemoryFileSystem, SubstrateKind};
    use starsync_ignore::IgnoreMatcher;

    type Batches = Arc<Mutex<Vec<Vec<FileChangeInfo>>>>;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            max_batch_size: 10,
            lock_timeout_secs: 5,
            poll_interval_ms: 25,
            debounce_ms: 10,
        }
    }

    fn collecting_callback(batches: Batches) -> ChangeCallback {
        Arc::new(move |_source, changes| {
            let batches = batches.clone();
            Box::pin(async move {
                batches.lock().unwrap().push(changes);
            })
        })
    }

    async fn watched_target() -> (Arc<SyncTarget>, Arc<MemoryFileSystem>, Batches) {
        let fs = Arc::new(MemoryFileSystem::new());
        let target = Arc::new(SyncTarget::with_config(
            TargetId::new("watched").unwrap(),
            SubstrateKind::Memory,
            Arc::new(IgnoreMatcher::new()),
            &fast_config(),
        ));
        target.initialize(fs.clone(), true).await.unwrap();

        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        target.watch(collecting_callback(batches.clone())).unwrap();
        (target, fs, batches)
    }

    async fn wait_for_batch(batches: &Batches) -> Vec<FileChangeInfo> {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut guard = batches.lock().unwrap();
            if !guard.is_empty() {
                return guard.remove(0);
            }
        }
        panic!("no change batch detected in time");
    }

    fn path(p: &str) -> SyncPath {
        SyncPath::new(p).unwrap()
    }

    #[tokio::test]
    async fn test_detects_create() {
        let (target, fs, batches) = watched_target().await;

        fs.write_file(&path("/new.txt"), b"hello", false).await.unwrap();

        let batch = wait_for_batch(&batches).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].change_type, ChangeType::Create);
        assert_eq!(batch[0].path.as_str(), "/new.txt");
        assert_eq!(batch[0].source_target_id.as_str(), "watched");

        target.unwatch();
    }

    #[tokio::test]
    async fn test_detects_modify_and_delete() {
        let (target, fs, batches) = watched_target().await;

        fs.write_file(&path("/f.txt"), b"one", false).await.unwrap();
        let created = wait_for_batch(&batches).await;
        assert_eq!(created[0].change_type, ChangeType::Create);

        tokio::time::sleep(Duration::from_millis(5)).await;
        fs.write_file(&path("/f.txt"), b"two", false).await.unwrap();
        let modified = wait_for_batch(&batches).await;
        assert_eq!(modified[0].change_type, ChangeType::Modify);

        fs.delete_item(&path("/f.txt"), false, false).await.unwrap();
        let deleted = wait_for_batch(&batches).await;
        assert_eq!(deleted[0].change_type, ChangeType::Delete);
        assert!(deleted[0].metadata.content_hash.is_empty());

        target.unwatch();
    }

    #[tokio::test]
    async fn test_secondary_pending_bootstrap_reports_nothing() {
        let fs = Arc::new(MemoryFileSystem::new());
        let target = Arc::new(SyncTarget::with_config(
            TargetId::new("sec").unwrap(),
            SubstrateKind::Memory,
            Arc::new(IgnoreMatcher::new()),
            &fast_config(),
        ));
        target.initialize(fs.clone(), false).await.unwrap();

        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        target.watch(collecting_callback(batches.clone())).unwrap();

        fs.write_file(&path("/x.txt"), b"x", false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(batches.lock().unwrap().is_empty());

        target.unwatch();
    }

    #[tokio::test]
    async fn test_ignored_paths_never_reported() {
        let (target, fs, batches) = watched_target().await;

        fs.create_directory(&path("/.git"), false, false).await.unwrap();
        fs.write_file(&path("/.git/HEAD"), b"ref", false).await.unwrap();
        fs.write_file(&path("/a.txt"), b"a", false).await.unwrap();

        let batch = wait_for_batch(&batches).await;
        let paths: Vec<_> = batch.iter().map(|c| c.path.as_str()).collect();
        assert!(paths.contains(&"/a.txt"));
        assert!(!paths.iter().any(|p| p.starts_with("/.git")));

        target.unwatch();
    }

    #[tokio::test]
    async fn test_unwatch_stops_detection() {
        let (target, fs, batches) = watched_target().await;
        target.unwatch();

        fs.write_file(&path("/late.txt"), b"x", false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(batches.lock().unwrap().is_empty());
        assert_eq!(target.state(), TargetState::Idle);
    }

    #[tokio::test]
    async fn test_watch_requires_idle() {
        let fs = Arc::new(MemoryFileSystem::new());
        let target = Arc::new(SyncTarget::with_config(
            TargetId::new("t").unwrap(),
            SubstrateKind::Memory,
            Arc::new(IgnoreMatcher::new()),
            &fast_config(),
        ));
        // Not initialized yet
        let err = target
            .watch(collecting_callback(Arc::new(Mutex::new(Vec::new()))))
            .unwrap_err();
        assert_eq!(err.code(), "WATCH_FAILED");

        target.initialize(fs, true).await.unwrap();
        target
            .watch(collecting_callback(Arc::new(Mutex::new(Vec::new()))))
            .unwrap();
        // Second watch is refused
        let err = target
            .watch(collecting_callback(Arc::new(Mutex::new(Vec::new()))))
            .unwrap_err();
        assert_eq!(err.code(), "WATCH_FAILED");
        target.unwatch();
    }
}
