//! Progress events and listener registry
//!
//! The manager reports fan-out progress through a listener registry.
//! Listener panics are isolated: one misbehaving listener never stops
//! the others from being notified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{trace, warn};

use starsync_core::domain::{FileChunk, SyncPath, TargetId};
use starsync_fs::{ChunkSource, FileContentStream, FsError};

// ============================================================================
// Event model
// ============================================================================

/// Phase a failure occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Gathering changes or metadata from the source
    Collecting,
    /// Moving content chunks between surfaces
    Streaming,
    /// Writing a change onto the destination
    Applying,
}

/// One progress notification from the manager
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Per-file progression through a destination's change set
    Syncing {
        source_target_id: TargetId,
        target_id: TargetId,
        total_files: usize,
        synced_files: usize,
        current_file: SyncPath,
    },
    /// Per-chunk progression through one file's content
    Streaming {
        source_target_id: TargetId,
        target_id: TargetId,
        current_file: SyncPath,
        processed_bytes: u64,
        total_bytes: u64,
    },
    /// A destination finished its change set
    Completing {
        source_target_id: TargetId,
        target_id: TargetId,
        successful_files: usize,
        failed_files: usize,
    },
    /// A change failed on a destination
    Error {
        source_target_id: TargetId,
        target_id: TargetId,
        current_file: Option<SyncPath>,
        error: String,
        phase: SyncPhase,
    },
}

/// Receiver of progress events
///
/// Implemented for plain closures as well.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Handle for removing a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

// ============================================================================
// Broadcaster
// ============================================================================

/// Listener registry with panic isolation
pub(crate) struct ProgressBroadcaster {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ProgressListener>)>>,
    next_id: AtomicU64,
}

impl ProgressBroadcaster {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .retain(|(lid, _)| *lid != id);
    }

    /// Delivers an event to every listener
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    pub(crate) fn emit(&self, event: ProgressEvent) {
        let listeners: Vec<Arc<dyn ProgressListener>> = self
            .listeners
            .read()
            .expect("listener registry poisoned")
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        trace!(?event, listeners = listeners.len(), "Emitting progress event");
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_progress(&event))).is_err() {
                warn!("Progress listener panicked, continuing with remaining listeners");
            }
        }
    }
}

// ============================================================================
// Streaming instrumentation
// ============================================================================

/// Rebuilds a content stream so each drained chunk emits a streaming
/// progress event.
pub(crate) fn instrument_stream(
    stream: FileContentStream,
    broadcaster: Arc<ProgressBroadcaster>,
    source: TargetId,
    target: TargetId,
) -> FileContentStream {
    let (metadata, inner) = stream.into_parts();
    match inner {
        Some(inner) => {
            let wrapped = InstrumentedSource {
                inner,
                broadcaster,
                source,
                target,
                path: metadata.path.clone(),
                total_bytes: metadata.size_bytes,
                processed_bytes: 0,
            };
            FileContentStream::new(metadata, Box::new(wrapped))
        }
        None => FileContentStream::empty(metadata),
    }
}

struct InstrumentedSource {
    inner: Box<dyn ChunkSource>,
    broadcaster: Arc<ProgressBroadcaster>,
    source: TargetId,
    target: TargetId,
    path: SyncPath,
    total_bytes: u64,
    processed_bytes: u64,
}

#[async_trait]
impl ChunkSource for InstrumentedSource {
    async fn next_chunk(&mut self) -> Result<Option<FileChunk>, FsError> {
        let chunk = self.inner.next_chunk().await?;
        if let Some(chunk) = &chunk {
            self.processed_bytes += chunk.data.len() as u64;
            self.broadcaster.emit(ProgressEvent::Streaming {
                source_target_id: self.source.clone(),
                target_id: self.target.clone(),
                current_file: self.path.clone(),
                processed_bytes: self.processed_bytes,
                total_bytes: self.total_bytes,
            });
        }
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use starsync_core::domain::{ContentHash, FileKind, FileMetadata};

    fn event() -> ProgressEvent {
        ProgressEvent::Completing {
            source_target_id: TargetId::new("src").unwrap(),
            target_id: TargetId::new("dst").unwrap(),
            successful_files: 1,
            failed_files: 0,
        }
    }

    #[test]
    fn test_listeners_receive_events() {
        let broadcaster = ProgressBroadcaster::new();
        let seen = Arc::new(Mutex::new(0usize));

        let counter = seen.clone();
        broadcaster.add(Arc::new(move |_event: &ProgressEvent| {
            *counter.lock().unwrap() += 1;
        }));

        broadcaster.emit(event());
        broadcaster.emit(event());
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_remove_listener() {
        let broadcaster = ProgressBroadcaster::new();
        let seen = Arc::new(Mutex::new(0usize));

        let counter = seen.clone();
        let id = broadcaster.add(Arc::new(move |_event: &ProgressEvent| {
            *counter.lock().unwrap() += 1;
        }));

        broadcaster.emit(event());
        broadcaster.remove(id);
        broadcaster.emit(event());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let broadcaster = ProgressBroadcaster::new();
        let seen = Arc::new(Mutex::new(0usize));

        broadcaster.add(Arc::new(|_event: &ProgressEvent| {
            panic!("listener bug");
        }));
        let counter = seen.clone();
        broadcaster.add(Arc::new(move |_event: &ProgressEvent| {
            *counter.lock().unwrap() += 1;
        }));

        broadcaster.emit(event());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_instrumented_stream_emits_per_chunk() {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        broadcaster.add(Arc::new(move |event: &ProgressEvent| {
            if let ProgressEvent::Streaming {
                processed_bytes,
                total_bytes,
                ..
            } = event
            {
                sink.lock().unwrap().push((*processed_bytes, *total_bytes));
            }
        }));

        let metadata = FileMetadata {
            path: SyncPath::new("/a").unwrap(),
            kind: FileKind::File,
            content_hash: ContentHash::empty(),
            size_bytes: 10,
            last_modified: Utc::now(),
        };
        let stream = FileContentStream::from_bytes(metadata, b"0123456789".to_vec(), 4);
        let wrapped = instrument_stream(
            stream,
            broadcaster,
            TargetId::new("src").unwrap(),
            TargetId::new("dst").unwrap(),
        );

        let bytes = wrapped.drain().await.unwrap();
        assert_eq!(bytes, b"0123456789");
        assert_eq!(*seen.lock().unwrap(), vec![(4, 10), (8, 10), (10, 10)]);
    }
}
