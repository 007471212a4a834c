//! Pending sync retention
//!
//! When a destination refuses or fails a change batch, the batch is
//! retained in a [`PendingSync`] record until the operator confirms or
//! rejects it. At most one record exists at a time; a pending from a
//! newer cycle supersedes an older one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use starsync_core::domain::{FileChangeInfo, SyncPath, TargetId};

/// One destination's retained change set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTargetSync {
    /// The ordered changes that destination did not accept
    pub changes: Vec<FileChangeInfo>,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
    /// Whether the last propagation attempt failed
    pub failed: bool,
}

/// Retained record of an incomplete propagation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSync {
    source_target_id: TargetId,
    pending_by_target: BTreeMap<TargetId, PendingTargetSync>,
}

impl PendingSync {
    /// Creates an empty record for changes originating on `source`
    pub fn new(source: TargetId) -> Self {
        Self {
            source_target_id: source,
            pending_by_target: BTreeMap::new(),
        }
    }

    /// Target the retained changes originated on
    pub fn source_target_id(&self) -> &TargetId {
        &self.source_target_id
    }

    /// Per-destination retained change sets
    pub fn pending_by_target(&self) -> &BTreeMap<TargetId, PendingTargetSync> {
        &self.pending_by_target
    }

    /// Records a destination's failed batch, replacing any prior slot
    pub fn record_failure(&mut self, target: TargetId, changes: Vec<FileChangeInfo>) {
        self.pending_by_target.insert(
            target,
            PendingTargetSync {
                changes,
                timestamp: Utc::now(),
                failed: true,
            },
        );
    }

    /// Drops one destination's slot (it succeeded or was rejected)
    pub fn clear_target(&mut self, target: &TargetId) {
        self.pending_by_target.remove(target);
    }

    /// Returns true once no destination has retained changes
    pub fn is_empty(&self) -> bool {
        self.pending_by_target.is_empty()
    }

    /// All retained changes, deduplicated by path (last wins)
    pub fn deduplicated_changes(&self) -> Vec<FileChangeInfo> {
        let mut by_path: BTreeMap<SyncPath, FileChangeInfo> = BTreeMap::new();
        for slot in self.pending_by_target.values() {
            for change in &slot.changes {
                by_path.insert(change.path.clone(), change.clone());
            }
        }
        by_path.into_values().collect()
    }

    // ------------------------------------------------------------------
    // Legacy snapshot accessors
    //
    // Older consumers read the primary slot's fields off the outer
    // record. New code traverses pending_by_target.
    // ------------------------------------------------------------------

    /// Changes retained for `primary_id` (legacy shape)
    pub fn changes(&self, primary_id: &TargetId) -> Option<&[FileChangeInfo]> {
        self.pending_by_target
            .get(primary_id)
            .map(|slot| slot.changes.as_slice())
    }

    /// Whether the primary's propagation failed (legacy shape)
    pub fn failed_primary_sync(&self, primary_id: &TargetId) -> bool {
        self.pending_by_target
            .get(primary_id)
            .map(|slot| slot.failed)
            .unwrap_or(false)
    }

    /// Timestamp of the primary slot (legacy shape)
    pub fn timestamp(&self, primary_id: &TargetId) -> Option<DateTime<Utc>> {
        self.pending_by_target
            .get(primary_id)
            .map(|slot| slot.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starsync_core::domain::{ChangeType, ContentHash, FileKind, FileMetadata};

    fn change(path: &str, change_type: ChangeType) -> FileChangeInfo {
        let path = SyncPath::new(path).unwrap();
        FileChangeInfo {
            path: path.clone(),
            change_type,
            metadata: FileMetadata {
                path,
                kind: FileKind::File,
                content_hash: ContentHash::empty(),
                size_bytes: 0,
                last_modified: Utc::now(),
            },
            source_target_id: TargetId::new("src").unwrap(),
        }
    }

    #[test]
    fn test_record_and_clear() {
        let mut pending = PendingSync::new(TargetId::new("src").unwrap());
        assert!(pending.is_empty());

        let dest = TargetId::new("dest").unwrap();
        pending.record_failure(dest.clone(), vec![change("/a", ChangeType::Create)]);
        assert!(!pending.is_empty());
        assert!(pending.pending_by_target()[&dest].failed);

        pending.clear_target(&dest);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_record_replaces_prior_slot() {
        let mut pending = PendingSync::new(TargetId::new("src").unwrap());
        let dest = TargetId::new("dest").unwrap();

        pending.record_failure(dest.clone(), vec![change("/a", ChangeType::Create)]);
        pending.record_failure(dest.clone(), vec![change("/b", ChangeType::Create)]);

        let slot = &pending.pending_by_target()[&dest];
        assert_eq!(slot.changes.len(), 1);
        assert_eq!(slot.changes[0].path.as_str(), "/b");
    }

    #[test]
    fn test_deduplicated_changes_last_wins() {
        let mut pending = PendingSync::new(TargetId::new("src").unwrap());
        pending.record_failure(
            TargetId::new("a").unwrap(),
            vec![change("/x", ChangeType::Create), change("/y", ChangeType::Create)],
        );
        pending.record_failure(
            TargetId::new("b").unwrap(),
            vec![change("/x", ChangeType::Modify)],
        );

        let deduped = pending.deduplicated_changes();
        assert_eq!(deduped.len(), 2);
        let x = deduped.iter().find(|c| c.path.as_str() == "/x").unwrap();
        // The later slot's entry for /x wins
        assert_eq!(x.change_type, ChangeType::Modify);
    }

    #[test]
    fn test_legacy_accessors() {
        let mut pending = PendingSync::new(TargetId::new("src").unwrap());
        let primary = TargetId::new("primary").unwrap();

        assert!(pending.changes(&primary).is_none());
        assert!(!pending.failed_primary_sync(&primary));

        pending.record_failure(primary.clone(), vec![change("/z", ChangeType::Create)]);
        assert_eq!(pending.changes(&primary).unwrap().len(), 1);
        assert!(pending.failed_primary_sync(&primary));
        assert!(pending.timestamp(&primary).is_some());
    }
}
