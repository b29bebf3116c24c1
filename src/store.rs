//! Core snapshot store (§4.3): on-disk layout, index, in-memory cache, and
//! atomic save/load/remove.
//!
//! Mirrors `maw`'s op-log write path (`oplog/write.rs`): every mutation
//! writes its artifact to a temp file in the destination directory, then
//! renames it into place, so a reader never observes a half-written
//! snapshot or index.

use std::collections::HashMap;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{info, warn};

use crate::config::DiffExternalizationFormat;
use crate::model::types::{IndexEntry, IndexFile, SnapshotId, SnapshotRecord};

/// Directory, relative to the workspace root, the store is rooted at.
pub const SNAPSHOTS_DIR: &str = ".continue-reasoning/snapshots";

/// Failure modes for the core snapshot store.
#[derive(Debug)]
pub enum StoreError {
    /// A filesystem operation failed.
    Io(std::io::Error),
    /// `index.json` or a per-snapshot JSON file did not deserialize.
    Corrupt {
        /// The file that failed to parse.
        path: PathBuf,
        /// The underlying error message.
        reason: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "snapshot store I/O error: {e}"),
            Self::Corrupt { path, reason } => {
                write!(f, "corrupt snapshot data at {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Corrupt { .. } => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// The in-memory cache: an id→entry map plus two id orderings, kept
/// consistent with disk after every mutation (§4.3 "Cache guarantees").
#[derive(Default)]
struct Cache {
    by_id: HashMap<SnapshotId, IndexEntry>,
    ids_by_time: Vec<SnapshotId>,
    ids_by_sequence: Vec<SnapshotId>,
}

impl Cache {
    fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut cache = Self::default();
        for entry in entries {
            cache.insert(entry);
        }
        cache
    }

    fn insert(&mut self, entry: IndexEntry) {
        self.by_id.insert(entry.id.clone(), entry);
        self.resort();
    }

    fn remove(&mut self, id: &SnapshotId) -> Option<IndexEntry> {
        let removed = self.by_id.remove(id);
        if removed.is_some() {
            self.resort();
        }
        removed
    }

    fn resort(&mut self) {
        let mut by_time: Vec<&IndexEntry> = self.by_id.values().collect();
        by_time.sort_by_key(|e| e.timestamp);
        self.ids_by_time = by_time.into_iter().map(|e| e.id.clone()).collect();

        let mut by_seq: Vec<&IndexEntry> = self.by_id.values().collect();
        by_seq.sort_by_key(|e| e.sequence_number);
        self.ids_by_sequence = by_seq.into_iter().map(|e| e.id.clone()).collect();
    }

    fn to_index_file(&self) -> IndexFile {
        IndexFile {
            snapshots: self.ids_by_sequence.iter().filter_map(|id| self.by_id.get(id).cloned()).collect(),
        }
    }
}

/// Persistence, indexing, and caching for one workspace's snapshots (§4.3).
pub struct CoreStore {
    workspace_path: PathBuf,
    root: PathBuf,
    diff_format: DiffExternalizationFormat,
    save_diff_files: bool,
    cache: Mutex<Cache>,
}

impl CoreStore {
    /// Build a store rooted at `<workspace_path>/.continue-reasoning/snapshots`.
    /// Call [`Self::init`] before using it.
    ///
    /// Timestamps arrive already stamped on each [`SnapshotRecord`] (the
    /// caller stamps them via an injected [`crate::clock::Clock`] before
    /// calling [`Self::save`]) — the store itself never originates a
    /// timestamp, so it takes no clock of its own.
    #[must_use]
    pub fn new(workspace_path: &Path, diff_format: DiffExternalizationFormat, save_diff_files: bool) -> Self {
        Self {
            workspace_path: workspace_path.to_path_buf(),
            root: workspace_path.join(SNAPSHOTS_DIR),
            diff_format,
            save_diff_files,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Create the on-disk layout if absent and load the cache.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if directories cannot be created.
    pub fn init(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        self.reload_cache()
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Re-read `index.json` from disk and rebuild the in-memory cache.
    /// A missing or corrupt index is treated as empty (logged, not fatal) so
    /// a workspace stays recoverable (§4.3 "Cache guarantees").
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] only for errors other than "file not
    /// found" — a missing index is not an error.
    pub fn reload_cache(&self) -> Result<(), StoreError> {
        let path = self.index_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Cache::default();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let entries = match serde_json::from_str::<IndexFile>(&content) {
            Ok(file) => file.snapshots,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt snapshot index, treating as empty");
                Vec::new()
            }
        };
        *self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Cache::from_entries(entries);
        Ok(())
    }

    fn persist_index(&self, cache: &Cache) -> Result<(), StoreError> {
        let file = cache.to_index_file();
        let json = serde_json::to_vec_pretty(&file).expect("IndexFile always serializes");
        write_atomic(&self.index_path(), &json)?;
        Ok(())
    }

    /// Persist `record`, externalizing its diff text if configured to, and
    /// update the in-memory index. Re-saving the same id overwrites it.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if any write fails. No partial state is
    /// observable: the cache and `index.json` are only updated after the
    /// snapshot JSON (and any externalized diff files) are durably written.
    pub fn save(&self, mut record: SnapshotRecord) -> Result<IndexEntry, StoreError> {
        let mut guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if self.save_diff_files {
            self.externalize_diffs(&mut record)?;
        }

        let timestamp = record.timestamp();
        let id = record.id().clone();
        let snapshot_path = self.snapshot_file_path(&id, timestamp);
        let json = serde_json::to_vec_pretty(&record).expect("SnapshotRecord always serializes");
        write_atomic(&snapshot_path, &json)?;

        let entry = IndexEntry {
            id: id.clone(),
            timestamp,
            tool: record.common().tool.clone(),
            affected_files: record.common().affected_files.clone(),
            sequence_number: record.sequence_number(),
            previous_snapshot_id: record.previous_snapshot_id().cloned(),
            consolidated: record.is_consolidated(),
        };
        guard.insert(entry.clone());
        self.persist_index(&guard)?;

        info!(id = %id, sequence = entry.sequence_number, "persisted snapshot");
        Ok(entry)
    }

    /// Load a snapshot by id, rehydrating any externalized diff text.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the file cannot be read, or
    /// [`StoreError::Corrupt`] if it does not deserialize as a
    /// [`SnapshotRecord`].
    pub fn load(&self, id: &SnapshotId) -> Result<Option<SnapshotRecord>, StoreError> {
        let entry = {
            let guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.by_id.get(id).cloned()
        };
        let Some(entry) = entry else {
            return Ok(None);
        };
        let path = self.snapshot_file_path(id, entry.timestamp);
        let content = std::fs::read_to_string(&path)?;
        let mut record: SnapshotRecord = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        self.rehydrate_diffs(&mut record)?;
        Ok(Some(record))
    }

    /// Remove an entry from the index (and in-memory caches). Does not
    /// delete the on-disk snapshot file — callers that want that do it
    /// explicitly, matching §4.3's "may be deleted by the caller".
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if `index.json` cannot be persisted.
    pub fn remove(&self, id: &SnapshotId) -> Result<(), StoreError> {
        let mut guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.remove(id);
        self.persist_index(&guard)
    }

    /// The most recently created snapshot, by timestamp.
    #[must_use]
    pub fn latest(&self) -> Option<IndexEntry> {
        let guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.ids_by_time.last().and_then(|id| guard.by_id.get(id)).cloned()
    }

    /// A snapshot of the full index, in sequence order.
    #[must_use]
    pub fn index(&self) -> Vec<IndexEntry> {
        let guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.ids_by_sequence.iter().filter_map(|id| guard.by_id.get(id)).cloned().collect()
    }

    /// Ids ordered oldest-to-newest by timestamp.
    #[must_use]
    pub fn ids_by_time(&self) -> Vec<SnapshotId> {
        self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner).ids_by_time.clone()
    }

    /// Ids ordered by sequence number.
    #[must_use]
    pub fn ids_by_sequence(&self) -> Vec<SnapshotId> {
        self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner).ids_by_sequence.clone()
    }

    /// The absolute path to the workspace this store serves.
    #[must_use]
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    fn snapshot_dir(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.root.join(format!("{:04}/{:02}/{:02}", timestamp.year(), timestamp.month(), timestamp.day()))
    }

    fn snapshot_file_path(&self, id: &SnapshotId, timestamp: DateTime<Utc>) -> PathBuf {
        self.snapshot_dir(timestamp).join(format!("{}_{id}.json", hhmmss(timestamp)))
    }

    fn diff_file_path(&self, id: &SnapshotId, timestamp: DateTime<Utc>, suffix: &str) -> PathBuf {
        self.snapshot_dir(timestamp)
            .join("diffs")
            .join(format!("{}_{id}_{suffix}.{}", hhmmss(timestamp), self.diff_format.extension()))
    }

    fn externalize_diffs(&self, record: &mut SnapshotRecord) -> Result<(), StoreError> {
        let id = record.id().clone();
        let timestamp = record.timestamp();
        let common = record.common_mut();

        if !common.diff.is_empty() && common.diff_path.is_none() {
            let path = self.diff_file_path(&id, timestamp, "diff");
            let rendered = render_externalized_diff(self.diff_format, &id, timestamp, "Forward Operation", &common.diff);
            write_atomic(&path, rendered.as_bytes())?;
            let relative = path.strip_prefix(&self.root).unwrap_or(&path).to_path_buf();
            common.diff = format!("[Stored in {}]", relative.display());
            common.diff_path = Some(relative);
        }

        if let Some(reverse_diff) = common.reverse_diff.clone() {
            if common.reverse_diff_path.is_none() {
                let path = self.diff_file_path(&id, timestamp, "reverse_diff");
                let rendered = render_externalized_diff(self.diff_format, &id, timestamp, "Reverse Operation", &reverse_diff);
                write_atomic(&path, rendered.as_bytes())?;
                let relative = path.strip_prefix(&self.root).unwrap_or(&path).to_path_buf();
                common.reverse_diff = Some(format!("[Stored in {}]", relative.display()));
                common.reverse_diff_path = Some(relative);
            }
        }
        Ok(())
    }

    fn rehydrate_diffs(&self, record: &mut SnapshotRecord) -> Result<(), StoreError> {
        let common = record.common_mut();
        if let Some(path) = common.diff_path.clone() {
            let content = std::fs::read_to_string(self.root.join(&path))?;
            common.diff = extract_diff_body(self.diff_format, &content);
        }
        if let Some(path) = common.reverse_diff_path.clone() {
            let content = std::fs::read_to_string(self.root.join(&path))?;
            common.reverse_diff = Some(extract_diff_body(self.diff_format, &content));
        }
        Ok(())
    }
}

fn hhmmss(timestamp: DateTime<Utc>) -> String {
    format!("{:02}{:02}{:02}", timestamp.hour(), timestamp.minute(), timestamp.second())
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().expect("snapshot paths always have a parent directory");
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn render_externalized_diff(
    format: DiffExternalizationFormat,
    id: &SnapshotId,
    timestamp: DateTime<Utc>,
    kind: &str,
    raw: &str,
) -> String {
    match format {
        DiffExternalizationFormat::Markdown => {
            format!("# Diff - {id}\n**Timestamp:** {timestamp}\n**Type:** {kind}\n\n```diff\n{raw}```\n")
        }
        DiffExternalizationFormat::Diff => raw.to_owned(),
        DiffExternalizationFormat::Txt => {
            format!("Diff for {id} ({kind}) at {timestamp}\n\n{raw}")
        }
    }
}

fn extract_diff_body(format: DiffExternalizationFormat, content: &str) -> String {
    match format {
        DiffExternalizationFormat::Markdown => content
            .split_once("```diff\n")
            .and_then(|(_, rest)| rest.rsplit_once("```"))
            .map_or_else(|| content.to_owned(), |(body, _)| body.to_owned()),
        DiffExternalizationFormat::Diff => content.to_owned(),
        DiffExternalizationFormat::Txt => content.split_once("\n\n").map_or_else(|| content.to_owned(), |(_, rest)| rest.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{Snapshot, SnapshotCommon, SnapshotContext, SnapshotMetadata};

    fn sample_record(id: &str, sequence_number: u64, timestamp: DateTime<Utc>) -> SnapshotRecord {
        SnapshotRecord::Plain(Snapshot {
            common: SnapshotCommon {
                id: SnapshotId::new(id).unwrap(),
                timestamp,
                sequence_number,
                previous_snapshot_id: None,
                tool: "ApplyWholeFileEdit".to_owned(),
                description: "create a".to_owned(),
                affected_files: vec![PathBuf::from("a.txt")],
                diff: "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1,1 @@\n+hi\n".to_owned(),
                reverse_diff: Some("--- a/a.txt\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-hi\n".to_owned()),
                base_file_hashes: Default::default(),
                result_file_hashes: Default::default(),
                context: SnapshotContext {
                    session_id: "s1".to_owned(),
                    workspace_path: "/ws".into(),
                    tool_params: None,
                },
                metadata: SnapshotMetadata {
                    files_size_bytes: 3,
                    lines_changed: 1,
                    execution_time_ms: 1,
                },
                diff_path: None,
                reverse_diff_path: None,
            },
            extra: serde_json::Map::new(),
        })
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let timestamp = DateTime::parse_from_rfc3339("2026-03-01T12:30:45Z").unwrap().with_timezone(&Utc);
        let record = sample_record("aaaaaa", 1, timestamp);
        store.save(record.clone()).unwrap();

        let loaded = store.load(&SnapshotId::new("aaaaaa").unwrap()).unwrap().unwrap();
        assert_eq!(loaded.id().as_str(), "aaaaaa");
        assert_eq!(loaded, record);
    }

    #[test]
    fn save_externalizes_diff_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, true);
        store.init().unwrap();
        let timestamp = DateTime::parse_from_rfc3339("2026-03-01T12:30:45Z").unwrap().with_timezone(&Utc);
        let record = sample_record("bbbbbb", 1, timestamp);
        let original_diff = record.common().diff.clone();
        store.save(record).unwrap();

        let loaded = store.load(&SnapshotId::new("bbbbbb").unwrap()).unwrap().unwrap();
        assert_eq!(loaded.common().diff, original_diff, "load must rehydrate externalized diff text");
        assert!(loaded.common().diff_path.is_some());
    }

    #[test]
    fn reload_cache_treats_missing_index_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        assert!(store.index().is_empty());
    }

    #[test]
    fn reload_cache_treats_corrupt_index_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        std::fs::write(dir.path().join(SNAPSHOTS_DIR).join("index.json"), "not json").unwrap();
        store.reload_cache().unwrap();
        assert!(store.index().is_empty());
    }

    #[test]
    fn latest_returns_most_recent_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let t1 = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-03-01T13:00:00Z").unwrap().with_timezone(&Utc);
        store.save(sample_record("aaaaaa", 1, t1)).unwrap();
        store.save(sample_record("bbbbbb", 2, t2)).unwrap();
        assert_eq!(store.latest().unwrap().id.as_str(), "bbbbbb");
    }

    #[test]
    fn remove_drops_entry_from_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let t1 = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let id = SnapshotId::new("aaaaaa").unwrap();
        store.save(sample_record("aaaaaa", 1, t1)).unwrap();
        store.remove(&id).unwrap();
        assert!(store.index().is_empty());
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn save_overwrites_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let t1 = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().with_timezone(&Utc);
        store.save(sample_record("aaaaaa", 1, t1)).unwrap();
        let mut second = sample_record("aaaaaa", 1, t1);
        second.common_mut().description = "updated".to_owned();
        store.save(second).unwrap();
        assert_eq!(store.index().len(), 1);
        let loaded = store.load(&SnapshotId::new("aaaaaa").unwrap()).unwrap().unwrap();
        assert_eq!(loaded.common().description, "updated");
    }
}
