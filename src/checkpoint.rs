// 📍 Checkpoint Store - resumable progress markers on disk
// One immutable snapshot per save plus a `latest_` pointer per (kind, channel).
//
// Layout:
//   <dir>/<kind>_<channel_id>_<YYYYmmdd_HHMMSS_ffffff>.json   (snapshot)
//   <dir>/latest_<kind>_<channel_id>.json                     (pointer)

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const LATEST_PREFIX: &str = "latest_";
const SNAPSHOT_STAMP: &str = "%Y%m%d_%H%M%S_%6f";

// ============================================================================
// OPERATION KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Export,
    Analyze,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Export => "export",
            OperationKind::Analyze => "analyze",
            OperationKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "export" => Some(OperationKind::Export),
            "analyze" => Some(OperationKind::Analyze),
            "delete" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

// ============================================================================
// CHECKPOINT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "operation_type")]
    pub kind: OperationKind,

    pub channel_id: i64,

    pub channel_username: String,

    pub processed_items: u64,

    pub total_items: u64,

    /// Last member id handled; the resume cursor for fetches.
    #[serde(default)]
    pub last_id: Option<i64>,

    /// Overwritten by `CheckpointStore::save`.
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn new(
        kind: OperationKind,
        channel_id: i64,
        channel_username: &str,
        processed_items: u64,
        total_items: u64,
    ) -> Self {
        Checkpoint {
            kind,
            channel_id,
            channel_username: channel_username.to_string(),
            processed_items,
            total_items,
            last_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_last_id(mut self, last_id: Option<i64>) -> Self {
        self.last_id = last_id;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(|v| v.as_u64())
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        (self.processed_items as f64 / self.total_items as f64) * 100.0
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (and create if needed) a checkpoint directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(CheckpointStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, kind: OperationKind, channel_id: i64, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.json",
            kind.as_str(),
            channel_id,
            at.format(SNAPSHOT_STAMP)
        ))
    }

    fn latest_path(&self, kind: OperationKind, channel_id: i64) -> PathBuf {
        self.dir
            .join(format!("{}{}_{}.json", LATEST_PREFIX, kind.as_str(), channel_id))
    }

    /// Stamp, write a snapshot, and repoint `latest`. Returns the snapshot path.
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<PathBuf> {
        let mut at = Utc::now();

        // Snapshot names must stay unique and ordered even within one clock tick.
        if let Some(previous) = self.load_latest(checkpoint.kind, checkpoint.channel_id) {
            if at <= previous.timestamp {
                at = previous.timestamp + ChronoDuration::microseconds(1);
            }
        }
        let mut path = self.snapshot_path(checkpoint.kind, checkpoint.channel_id, at);
        while path.exists() {
            at += ChronoDuration::microseconds(1);
            path = self.snapshot_path(checkpoint.kind, checkpoint.channel_id, at);
        }

        checkpoint.timestamp = at;
        let json = serde_json::to_string_pretty(checkpoint)?;

        fs::write(&path, &json)?;
        fs::write(self.latest_path(checkpoint.kind, checkpoint.channel_id), &json)?;

        tracing::debug!(
            kind = checkpoint.kind.as_str(),
            channel_id = checkpoint.channel_id,
            processed = checkpoint.processed_items,
            path = %path.display(),
            "checkpoint saved"
        );

        Ok(path)
    }

    /// Most recent checkpoint for the key; unreadable files count as absent.
    pub fn load_latest(&self, kind: OperationKind, channel_id: i64) -> Option<Checkpoint> {
        let path = self.latest_path(kind, channel_id);
        if !path.exists() {
            return None;
        }
        read_checkpoint(&path)
    }

    /// Every snapshot (never `latest_` pointers), newest first.
    pub fn list(&self, kind: Option<OperationKind>) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.ends_with(".json") || name.starts_with(LATEST_PREFIX) {
                continue;
            }
            if let Some(kind) = kind {
                if !name.starts_with(&format!("{}_", kind.as_str())) {
                    continue;
                }
            }
            if let Some(checkpoint) = read_checkpoint(&path) {
                checkpoints.push(checkpoint);
            }
        }

        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(checkpoints)
    }

    /// Snapshots grouped by operation kind, each group newest first.
    pub fn list_grouped(&self) -> Result<BTreeMap<OperationKind, Vec<Checkpoint>>> {
        let mut grouped: BTreeMap<OperationKind, Vec<Checkpoint>> = BTreeMap::new();
        for checkpoint in self.list(None)? {
            grouped.entry(checkpoint.kind).or_default().push(checkpoint);
        }
        Ok(grouped)
    }

    /// Remove the snapshot at `timestamp` (if given) and the `latest` pointer.
    pub fn delete(
        &self,
        kind: OperationKind,
        channel_id: i64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(at) = timestamp {
            remove_if_exists(&self.snapshot_path(kind, channel_id, at))?;
        }
        remove_if_exists(&self.latest_path(kind, channel_id))?;
        Ok(())
    }

    /// Keep the `keep_count` newest snapshots per (kind, channel). Returns how many were removed.
    ///
    /// Only snapshot files are touched; `latest` pointers survive pruning.
    pub fn prune(&self, keep_count: usize) -> Result<usize> {
        let mut grouped: HashMap<(OperationKind, i64), Vec<Checkpoint>> = HashMap::new();
        for checkpoint in self.list(None)? {
            grouped
                .entry((checkpoint.kind, checkpoint.channel_id))
                .or_default()
                .push(checkpoint);
        }

        let mut removed = 0;
        for ((kind, channel_id), mut group) in grouped {
            group.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            for stale in group.iter().skip(keep_count) {
                remove_if_exists(&self.snapshot_path(kind, channel_id, stale.timestamp))?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, keep_count, "pruned old checkpoints");
        }
        Ok(removed)
    }
}

fn read_checkpoint(path: &Path) -> Option<Checkpoint> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read checkpoint");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed checkpoint ignored");
            None
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path().join("checkpoints")).unwrap();
        (dir, store)
    }

    fn export_cp(processed: u64) -> Checkpoint {
        Checkpoint::new(OperationKind::Export, 42, "@chan", processed, 100)
    }

    #[test]
    fn test_save_and_load_latest() {
        let (_dir, store) = store();

        let mut cp = export_cp(10).with_last_id(Some(1010));
        let path = store.save(&mut cp).unwrap();
        assert!(path.exists());

        let loaded = store.load_latest(OperationKind::Export, 42).unwrap();
        assert_eq!(loaded.processed_items, 10);
        assert_eq!(loaded.last_id, Some(1010));
        assert_eq!(loaded.timestamp, cp.timestamp);
    }

    #[test]
    fn test_latest_tracks_most_recent_save() {
        let (_dir, store) = store();

        store.save(&mut export_cp(10)).unwrap();
        store.save(&mut export_cp(20)).unwrap();
        store.save(&mut export_cp(30)).unwrap();

        let latest = store.load_latest(OperationKind::Export, 42).unwrap();
        assert_eq!(latest.processed_items, 30);
        assert!(store.load_latest(OperationKind::Delete, 42).is_none());
    }

    #[test]
    fn test_file_field_names() {
        let (_dir, store) = store();
        let path = store
            .save(&mut export_cp(5).with_metadata("errors", serde_json::json!(2)))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        for field in [
            "operation_type",
            "channel_id",
            "channel_username",
            "processed_items",
            "total_items",
            "last_id",
            "timestamp",
            "metadata",
        ] {
            assert!(raw.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(raw["operation_type"], "export");
    }

    #[test]
    fn test_malformed_latest_is_none() {
        let (_dir, store) = store();
        fs::write(store.dir().join("latest_delete_42.json"), "{ not json").unwrap();

        assert!(store.load_latest(OperationKind::Delete, 42).is_none());
    }

    #[test]
    fn test_list_excludes_latest_and_filters_kind() {
        let (_dir, store) = store();

        store.save(&mut export_cp(1)).unwrap();
        store.save(&mut export_cp(2)).unwrap();
        store
            .save(&mut Checkpoint::new(OperationKind::Delete, 42, "@chan", 3, 10))
            .unwrap();

        let all = store.list(None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let exports = store.list(Some(OperationKind::Export)).unwrap();
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].processed_items, 2);

        let grouped = store.list_grouped().unwrap();
        assert_eq!(grouped[&OperationKind::Export].len(), 2);
        assert_eq!(grouped[&OperationKind::Delete].len(), 1);
    }

    #[test]
    fn test_delete_removes_snapshot_and_latest() {
        let (_dir, store) = store();

        let mut first = export_cp(1);
        store.save(&mut first).unwrap();
        store.save(&mut export_cp(2)).unwrap();

        store
            .delete(OperationKind::Export, 42, Some(first.timestamp))
            .unwrap();

        assert!(store.load_latest(OperationKind::Export, 42).is_none());
        let remaining = store.list(None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].processed_items, 2);
    }

    #[test]
    fn test_delete_without_timestamp_keeps_snapshots() {
        let (_dir, store) = store();
        store.save(&mut export_cp(1)).unwrap();

        store.delete(OperationKind::Export, 42, None).unwrap();

        assert!(store.load_latest(OperationKind::Export, 42).is_none());
        assert_eq!(store.list(None).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let (_dir, store) = store();

        let mut stamps = Vec::new();
        for i in 0..8 {
            let mut cp = export_cp(i);
            store.save(&mut cp).unwrap();
            stamps.push(cp.timestamp);
        }
        // A different key is pruned independently.
        store
            .save(&mut Checkpoint::new(OperationKind::Export, 7, "@other", 1, 1))
            .unwrap();

        let removed = store.prune(5).unwrap();
        assert_eq!(removed, 3);

        let remaining = store.list(Some(OperationKind::Export)).unwrap();
        let kept: Vec<_> = remaining
            .iter()
            .filter(|c| c.channel_id == 42)
            .map(|c| c.timestamp)
            .collect();
        stamps.sort_by(|a, b| b.cmp(a));
        assert_eq!(kept, stamps[..5].to_vec());
        assert_eq!(remaining.iter().filter(|c| c.channel_id == 7).count(), 1);
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(export_cp(25).progress_percentage(), 25.0);
        let empty = Checkpoint::new(OperationKind::Export, 1, "@c", 5, 0);
        assert_eq!(empty.progress_percentage(), 0.0);
    }
}
