//! Checkpoint manager (§4.4): the baseline against which unknown-change
//! detection runs.
//!
//! Mirrors [`crate::store::CoreStore`]'s on-disk discipline (temp-then-rename
//! writes, a metadata file plus one file per record, corrupt/missing state
//! treated as empty rather than fatal) but the object it persists is a full
//! hash (and optionally content) snapshot of the workspace tree rather than
//! a single edit's diff.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::diff::{self, GenerateOptions, MergeOptions};
use crate::hash::short_sha256_of_file;
use crate::model::types::{CheckpointData, CheckpointIndexEntry, CheckpointMetadata, CheckpointMetadataFile, FileHash, FileHashMap};

/// Directory, relative to the workspace root, checkpoints are rooted at.
pub const CHECKPOINTS_DIR: &str = ".continue-reasoning/checkpoints";

const METADATA_FILE: &str = "checkpoint-metadata.json";

/// The snapshot id recorded on the bootstrap checkpoint taken before any
/// snapshot exists (§3 "Checkpoint").
pub const INITIAL_SNAPSHOT_ID: &str = "initial";

/// Directory entries always skipped while scanning the workspace for a
/// checkpoint, regardless of `.snapshotignore` (§4.4 `create_initial`).
const SKIPPED_DIR_NAMES: &[&str] = &[".continue-reasoning", "node_modules", ".git"];

/// Failure modes for the checkpoint manager.
#[derive(Debug)]
pub enum CheckpointError {
    /// A filesystem operation failed.
    Io(std::io::Error),
    /// `checkpoint-metadata.json` or a per-checkpoint JSON file did not
    /// deserialize.
    Corrupt {
        /// The file that failed to parse.
        path: PathBuf,
        /// The underlying error message.
        reason: String,
    },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "checkpoint I/O error: {e}"),
            Self::Corrupt { path, reason } => {
                write!(f, "corrupt checkpoint data at {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Corrupt { .. } => None,
        }
    }
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// One classified change found by [`CheckpointManager::detect_unknown`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The baseline had no entry for this path and it now hashes non-empty.
    Added,
    /// The baseline's hash and the current hash differ, both non-empty.
    Modified,
    /// The baseline had an entry for this path and it now hashes empty.
    Deleted,
}

/// One path found to have drifted from the baseline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriftedFile {
    /// The workspace-relative path that changed.
    pub path: PathBuf,
    /// How it changed.
    pub kind: ChangeKind,
    /// The baseline's hash for this path (absent if it had none).
    pub baseline_hash: FileHash,
    /// The current hash for this path (absent if the file is now gone).
    pub current_hash: FileHash,
}

/// Result of [`CheckpointManager::detect_unknown`].
#[derive(Clone, Debug, PartialEq)]
pub struct DriftReport {
    /// Whether any drift was found.
    pub has_changes: bool,
    /// Every drifted path, in workspace-relative path order.
    pub changes: Vec<DriftedFile>,
    /// A single merged unified diff covering every drifted file, built from
    /// checkpoint content when available and a placeholder otherwise. Absent
    /// when `has_changes` is false.
    pub generated_diff: Option<String>,
}

/// Maintains the latest-state baseline used for unknown-change detection
/// (§4.4).
pub struct CheckpointManager {
    workspace_path: PathBuf,
    root: PathBuf,
    save_latest_files: bool,
    clock: std::sync::Arc<dyn Clock>,
    latest: Mutex<Option<CheckpointData>>,
}

impl CheckpointManager {
    /// Build a manager rooted at `<workspace_path>/.continue-reasoning/checkpoints`.
    /// Call [`Self::init`] before using it.
    #[must_use]
    pub fn new(workspace_path: &Path, save_latest_files: bool, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            workspace_path: workspace_path.to_path_buf(),
            root: workspace_path.join(CHECKPOINTS_DIR),
            save_latest_files,
            clock,
            latest: Mutex::new(None),
        }
    }

    /// Create the on-disk layout if absent and load the latest checkpoint
    /// into memory, if one exists.
    ///
    /// # Errors
    /// Returns [`CheckpointError::Io`] if directories cannot be created.
    pub fn init(&self) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.root)?;
        let metadata = self.read_metadata();
        if let Some(id) = metadata.latest_checkpoint_id {
            match self.load_by_id(&id) {
                Ok(Some(data)) => *self.lock_latest() = Some(data),
                Ok(None) => warn!(id = %id, "latest checkpoint id recorded but file missing"),
                Err(e) => warn!(id = %id, error = %e, "failed to load latest checkpoint, treating as absent"),
            }
        }
        Ok(())
    }

    fn lock_latest(&self) -> std::sync::MutexGuard<'_, Option<CheckpointData>> {
        self.latest.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Read `checkpoint-metadata.json`, treating a missing or corrupt file
    /// as empty (§4.3's "cache guarantees" pattern, reused here).
    fn read_metadata(&self) -> CheckpointMetadataFile {
        let path = self.metadata_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CheckpointMetadataFile::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read checkpoint metadata, treating as empty");
                return CheckpointMetadataFile::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt checkpoint metadata, treating as empty");
            CheckpointMetadataFile::default()
        })
    }

    fn write_metadata(&self, metadata: &CheckpointMetadataFile) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(metadata).expect("CheckpointMetadataFile always serializes");
        write_atomic(&self.metadata_path(), &json)?;
        Ok(())
    }

    /// Scan the workspace, hash every non-ignored file (skipping the
    /// engine's own state directory, `node_modules`, `.git`, `*.log`, and
    /// `.DS_Store` unconditionally, then everything `is_ignored` matches —
    /// `.snapshotignore` plus `config.ignore.exclude_from_checking`),
    /// optionally capture contents, and write the bootstrap checkpoint
    /// (§4.4 `create_initial`).
    ///
    /// # Errors
    /// Returns [`CheckpointError::Io`] if the checkpoint cannot be written.
    pub fn create_initial(&self, id_gen: impl FnOnce() -> String, is_ignored: &dyn Fn(&Path, bool) -> bool) -> Result<String, CheckpointError> {
        let start = self.clock.now();
        let file_hashes = self.scan_workspace(is_ignored);
        let file_contents = self.save_latest_files.then(|| self.capture_contents(file_hashes.keys()));
        let id = id_gen();
        let elapsed_ms = (self.clock.now() - start).num_milliseconds().max(0) as u64;

        let data = CheckpointData {
            id: id.clone(),
            timestamp: self.clock.now(),
            snapshot_id: INITIAL_SNAPSHOT_ID.to_owned(),
            metadata: CheckpointMetadata {
                total_files: file_hashes.len(),
                creation_time_ms: elapsed_ms,
            },
            file_hashes,
            file_contents,
        };
        self.persist(data)?;
        info!(id = %id, "created initial checkpoint");
        Ok(id)
    }

    /// Clone the latest checkpoint's hashes, recompute hashes (and contents,
    /// if configured) only for `affected_files`, and write a new checkpoint
    /// that becomes the latest (§4.4 `create_after`).
    ///
    /// # Errors
    /// Returns [`CheckpointError::Io`] if the checkpoint cannot be written.
    pub fn create_after(
        &self,
        snapshot_id: &str,
        affected_files: &[PathBuf],
        id_gen: impl FnOnce() -> String,
    ) -> Result<String, CheckpointError> {
        let start = self.clock.now();
        let mut file_hashes = self.lock_latest().as_ref().map(|d| d.file_hashes.clone()).unwrap_or_default();
        let mut file_contents = self.lock_latest().as_ref().and_then(|d| d.file_contents.clone());

        for rel in affected_files {
            let absolute = self.workspace_path.join(rel);
            let hash = short_sha256_of_file(&absolute);
            if hash.is_empty() {
                file_hashes.remove(rel);
                if let Some(contents) = file_contents.as_mut() {
                    contents.remove(rel);
                }
            } else {
                file_hashes.insert(rel.clone(), FileHash::from(hash));
                if self.save_latest_files {
                    if let Ok(text) = std::fs::read_to_string(&absolute) {
                        file_contents.get_or_insert_with(BTreeMap::new).insert(rel.clone(), text);
                    }
                }
            }
        }

        let id = id_gen();
        let elapsed_ms = (self.clock.now() - start).num_milliseconds().max(0) as u64;
        let data = CheckpointData {
            id: id.clone(),
            timestamp: self.clock.now(),
            snapshot_id: snapshot_id.to_owned(),
            metadata: CheckpointMetadata {
                total_files: file_hashes.len(),
                creation_time_ms: elapsed_ms,
            },
            file_hashes,
            file_contents,
        };
        self.persist(data)?;
        info!(id = %id, snapshot_id, "created checkpoint");
        Ok(id)
    }

    fn persist(&self, data: CheckpointData) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(&data).expect("CheckpointData always serializes");
        write_atomic(&self.checkpoint_path(&data.id), &json)?;

        let mut metadata = self.read_metadata();
        metadata.checkpoints.push(CheckpointIndexEntry {
            id: data.id.clone(),
            timestamp: data.timestamp,
        });
        metadata.latest_checkpoint_id = Some(data.id.clone());
        self.write_metadata(&metadata)?;

        *self.lock_latest() = Some(data);
        Ok(())
    }

    /// Load a checkpoint by id, or the latest one when `id` is `None`.
    ///
    /// # Errors
    /// Returns [`CheckpointError::Io`] if the file cannot be read, or
    /// [`CheckpointError::Corrupt`] if it does not deserialize.
    pub fn load(&self, id: Option<&str>) -> Result<Option<CheckpointData>, CheckpointError> {
        match id {
            Some(id) => self.load_by_id(id),
            None => Ok(self.lock_latest().clone()),
        }
    }

    fn load_by_id(&self, id: &str) -> Result<Option<CheckpointData>, CheckpointError> {
        let path = self.checkpoint_path(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt { path, reason: e.to_string() })
    }

    /// The most recently created checkpoint, if any.
    #[must_use]
    pub fn latest(&self) -> Option<CheckpointData> {
        self.lock_latest().clone()
    }

    /// Number of checkpoints recorded in `checkpoint-metadata.json`.
    #[must_use]
    pub fn checkpoint_count(&self) -> usize {
        self.read_metadata().checkpoints.len()
    }

    /// Compute current hashes for every non-ignored file under
    /// consideration (skipping `affected_files`, which are the intended
    /// operation, not drift), compare against the latest checkpoint's
    /// hashes, and classify every difference (§4.4 `detect_unknown`).
    ///
    /// `is_ignored` is the same matcher `.snapshotignore` and
    /// `config.ignore.exclude_from_checking` build for the engine's own
    /// [`crate::ignore::IgnoreManager`] — a path it matches is dropped from
    /// the candidate set even if the baseline still has a hash on record
    /// for it, so a pattern added after a file was first checkpointed
    /// retroactively exempts that file from drift detection.
    ///
    /// A path absent from both the baseline and the current workspace scan
    /// produces no entry — a file created and deleted again between two
    /// checkpoints is not reported, since there is nothing to compare it
    /// against (§8 "Open questions", resolved in `DESIGN.md`).
    pub fn detect_unknown(
        &self,
        affected_files: &[PathBuf],
        is_ignored: &dyn Fn(&Path, bool) -> bool,
        calc_hashes: impl Fn(&[PathBuf]) -> FileHashMap,
    ) -> DriftReport {
        let baseline = self.lock_latest().as_ref().map(|d| d.file_hashes.clone()).unwrap_or_default();
        let baseline_contents = self.lock_latest().as_ref().and_then(|d| d.file_contents.clone());
        let affected: std::collections::HashSet<&PathBuf> = affected_files.iter().collect();

        let mut candidates: Vec<PathBuf> = baseline.keys().cloned().collect();
        for path in self.current_workspace_paths(is_ignored) {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates.retain(|p| !affected.contains(p) && !is_ignored(p, false));
        candidates.sort();

        let current = calc_hashes(&candidates);

        let mut changes = Vec::new();
        for path in &candidates {
            let baseline_hash = baseline.get(path).cloned().unwrap_or_default();
            let current_hash = current.get(path).cloned().unwrap_or_default();
            let kind = match (baseline_hash.is_absent(), current_hash.is_absent()) {
                (true, false) => ChangeKind::Added,
                (false, true) => ChangeKind::Deleted,
                (false, false) if baseline_hash != current_hash => ChangeKind::Modified,
                _ => continue,
            };
            changes.push(DriftedFile {
                path: path.clone(),
                kind,
                baseline_hash,
                current_hash,
            });
        }

        let generated_diff = (!changes.is_empty()).then(|| self.build_drift_diff(&changes, baseline_contents.as_ref()));

        DriftReport {
            has_changes: !changes.is_empty(),
            changes,
            generated_diff,
        }
    }

    fn build_drift_diff(&self, changes: &[DriftedFile], baseline_contents: Option<&BTreeMap<PathBuf, String>>) -> String {
        let mut per_file = Vec::new();
        for change in changes {
            let path_str = change.path.to_string_lossy().into_owned();
            let old_text = if matches!(change.kind, ChangeKind::Added) {
                Some(String::new())
            } else {
                baseline_contents.and_then(|c| c.get(&change.path)).cloned()
            };
            let new_text = if matches!(change.kind, ChangeKind::Deleted) {
                Some(String::new())
            } else {
                std::fs::read_to_string(self.workspace_path.join(&change.path)).ok()
            };

            let text = match (old_text, new_text) {
                (Some(old), Some(new)) => diff::generate_unified_diff(
                    &old,
                    &new,
                    &GenerateOptions {
                        old_path: Some(path_str.clone()),
                        new_path: Some(path_str.clone()),
                        ..Default::default()
                    },
                ),
                _ => placeholder_diff(&path_str, &change.kind),
            };
            per_file.push(text);
        }

        if per_file.len() == 1 {
            return per_file.into_iter().next().unwrap_or_default();
        }
        diff::merge(&per_file, &MergeOptions::default())
            .map(|r| r.merged_text)
            .unwrap_or_else(|_| per_file.concat())
    }

    /// Prune checkpoints (and their files) whose timestamp is strictly
    /// older than `older_than` (§4.4 `cleanup`).
    ///
    /// # Errors
    /// Returns [`CheckpointError::Io`] if `checkpoint-metadata.json` cannot
    /// be persisted after pruning.
    pub fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, CheckpointError> {
        let mut metadata = self.read_metadata();
        let (keep, prune): (Vec<_>, Vec<_>) = metadata.checkpoints.drain(..).partition(|c| c.timestamp >= older_than);
        metadata.checkpoints = keep;
        if metadata
            .latest_checkpoint_id
            .as_ref()
            .is_some_and(|latest| prune.iter().any(|p| &p.id == latest))
        {
            metadata.latest_checkpoint_id = metadata.checkpoints.last().map(|c| c.id.clone());
        }
        for entry in &prune {
            let _ = std::fs::remove_file(self.checkpoint_path(&entry.id));
        }
        self.write_metadata(&metadata)?;
        Ok(prune.len())
    }

    fn current_workspace_paths(&self, is_ignored: &dyn Fn(&Path, bool) -> bool) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        walk(&self.workspace_path, &self.workspace_path, is_ignored, &mut paths);
        paths
    }

    fn capture_contents<'a>(&self, paths: impl Iterator<Item = &'a PathBuf>) -> BTreeMap<PathBuf, String> {
        let mut contents = BTreeMap::new();
        for path in paths {
            if let Ok(text) = std::fs::read_to_string(self.workspace_path.join(path)) {
                contents.insert(path.clone(), text);
            }
        }
        contents
    }

    fn scan_workspace(&self, is_ignored: &dyn Fn(&Path, bool) -> bool) -> FileHashMap {
        let mut hashes = FileHashMap::new();
        for path in self.current_workspace_paths(is_ignored) {
            let absolute = self.workspace_path.join(&path);
            let hash = short_sha256_of_file(&absolute);
            if !hash.is_empty() {
                hashes.insert(path, FileHash::from(hash));
            }
        }
        hashes
    }
}

fn placeholder_diff(path: &str, kind: &ChangeKind) -> String {
    let label = match kind {
        ChangeKind::Added => "added",
        ChangeKind::Modified => "modified",
        ChangeKind::Deleted => "deleted",
    };
    format!("--- a/{path}\n+++ b/{path}\n@@ -0,0 +0,0 @@\n\\ No newline at end of file (content unavailable, file {label})\n")
}

fn walk(root: &Path, dir: &Path, is_ignored: &dyn Fn(&Path, bool) -> bool, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if path.is_dir() {
            if SKIPPED_DIR_NAMES.iter().any(|s| *s == name_str) || is_ignored(relative, true) {
                continue;
            }
            walk(root, &path, is_ignored, out);
        } else if name_str != ".DS_Store" && !name_str.ends_with(".log") && !is_ignored(relative, false) {
            out.push(relative.to_path_buf());
        }
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().expect("checkpoint paths always have a parent directory");
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use std::sync::Arc;

    fn clock_at(s: &str) -> Arc<dyn Clock> {
        Arc::new(FixedClock::at(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)))
    }

    /// An ignore predicate that exempts nothing, for tests that only care
    /// about this module's own hardcoded skips.
    fn no_ignore(_: &Path, _: bool) -> bool {
        false
    }

    #[test]
    fn create_initial_hashes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi\n").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "bye\n").unwrap();

        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        let id = manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();

        let data = manager.load(Some(&id)).unwrap().unwrap();
        assert_eq!(data.snapshot_id, INITIAL_SNAPSHOT_ID);
        assert_eq!(data.file_hashes.len(), 2);
        assert!(data.file_contents.is_none());
    }

    #[test]
    fn create_initial_captures_contents_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi\n").unwrap();

        let manager = CheckpointManager::new(dir.path(), true, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        let id = manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();

        let data = manager.load(Some(&id)).unwrap().unwrap();
        assert_eq!(data.file_contents.unwrap().get(&PathBuf::from("a.txt")).map(String::as_str), Some("hi\n"));
    }

    #[test]
    fn create_initial_skips_state_dir_and_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".continue-reasoning")).unwrap();
        std::fs::write(dir.path().join(".continue-reasoning/junk.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(dir.path().join("debug.log"), "log line").unwrap();
        std::fs::write(dir.path().join("keep.txt"), "kept").unwrap();

        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        let id = manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();
        let data = manager.load(Some(&id)).unwrap().unwrap();
        assert_eq!(data.file_hashes.len(), 1);
        assert!(data.file_hashes.contains_key(&PathBuf::from("keep.txt")));
    }

    #[test]
    fn create_initial_excludes_paths_matched_by_the_ignore_predicate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "kept").unwrap();
        std::fs::create_dir_all(dir.path().join("secrets")).unwrap();
        std::fs::write(dir.path().join("secrets/key.pem"), "shh").unwrap();

        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        let is_ignored = |p: &Path, _: bool| p.starts_with("secrets");
        let id = manager.create_initial(|| "ckpt01".to_owned(), &is_ignored).unwrap();

        let data = manager.load(Some(&id)).unwrap().unwrap();
        assert_eq!(data.file_hashes.len(), 1);
        assert!(data.file_hashes.contains_key(&PathBuf::from("keep.txt")));
    }

    #[test]
    fn create_after_only_rehashes_affected_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "untouched\n").unwrap();

        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        let first = manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();
        let before = manager.load(Some(&first)).unwrap().unwrap();

        std::fs::write(dir.path().join("a.txt"), "hi\nmore\n").unwrap();
        let second = manager.create_after("snap01", &[PathBuf::from("a.txt")], || "ckpt02".to_owned()).unwrap();
        let after = manager.load(Some(&second)).unwrap().unwrap();

        assert_ne!(
            before.file_hashes.get(&PathBuf::from("a.txt")),
            after.file_hashes.get(&PathBuf::from("a.txt"))
        );
        assert_eq!(
            before.file_hashes.get(&PathBuf::from("b.txt")),
            after.file_hashes.get(&PathBuf::from("b.txt"))
        );
    }

    #[test]
    fn detect_unknown_classifies_added_modified_deleted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("modified.txt"), "before\n").unwrap();
        std::fs::write(dir.path().join("deleted.txt"), "gone soon\n").unwrap();

        let manager = CheckpointManager::new(dir.path(), true, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();

        std::fs::write(dir.path().join("modified.txt"), "after\n").unwrap();
        std::fs::remove_file(dir.path().join("deleted.txt")).unwrap();
        std::fs::write(dir.path().join("added.txt"), "new\n").unwrap();

        let workspace = dir.path().to_path_buf();
        let report = manager.detect_unknown(&[], &no_ignore, |paths| {
            paths
                .iter()
                .map(|p| (p.clone(), FileHash::from(short_sha256_of_file(&workspace.join(p)))))
                .collect()
        });

        assert!(report.has_changes);
        assert_eq!(report.changes.len(), 3);
        assert!(report
            .changes
            .iter()
            .any(|c| c.path == PathBuf::from("added.txt") && c.kind == ChangeKind::Added));
        assert!(report
            .changes
            .iter()
            .any(|c| c.path == PathBuf::from("modified.txt") && c.kind == ChangeKind::Modified));
        assert!(report
            .changes
            .iter()
            .any(|c| c.path == PathBuf::from("deleted.txt") && c.kind == ChangeKind::Deleted));
        assert!(report.generated_diff.is_some());
    }

    #[test]
    fn detect_unknown_skips_declared_affected_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "v1\n").unwrap();

        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();
        std::fs::write(dir.path().join("a.txt"), "v2 - intended edit\n").unwrap();

        let workspace = dir.path().to_path_buf();
        let report = manager.detect_unknown(&[PathBuf::from("a.txt")], &no_ignore, |paths| {
            paths
                .iter()
                .map(|p| (p.clone(), FileHash::from(short_sha256_of_file(&workspace.join(p)))))
                .collect()
        });
        assert!(!report.has_changes);
    }

    #[test]
    fn detect_unknown_reports_nothing_when_baseline_is_empty_and_workspace_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();
        let workspace = dir.path().to_path_buf();
        let report = manager.detect_unknown(&[], &no_ignore, |paths| {
            paths
                .iter()
                .map(|p| (p.clone(), FileHash::from(short_sha256_of_file(&workspace.join(p)))))
                .collect()
        });
        assert!(!report.has_changes);
    }

    #[test]
    fn detect_unknown_excludes_paths_matched_by_the_ignore_predicate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.env"), "before\n").unwrap();

        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();

        std::fs::write(dir.path().join("secret.env"), "after\n").unwrap();
        let workspace = dir.path().to_path_buf();
        let is_ignored = |p: &Path, _: bool| p == Path::new("secret.env");
        let report = manager.detect_unknown(&[], &is_ignored, |paths| {
            paths
                .iter()
                .map(|p| (p.clone(), FileHash::from(short_sha256_of_file(&workspace.join(p)))))
                .collect()
        });
        assert!(!report.has_changes);
    }

    #[test]
    fn cleanup_prunes_old_checkpoints_and_retargets_latest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        manager.create_initial(|| "old".to_owned(), &no_ignore).unwrap();

        let cutoff = DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
        let removed = manager.cleanup(cutoff).unwrap();
        assert_eq!(removed, 1);
        assert!(manager.load(Some("old")).unwrap().is_none());
    }

    #[test]
    fn init_recovers_from_missing_latest_checkpoint_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        manager.init().unwrap();
        manager.create_initial(|| "ckpt01".to_owned(), &no_ignore).unwrap();
        std::fs::remove_file(dir.path().join(CHECKPOINTS_DIR).join("ckpt01.json")).unwrap();

        let reloaded = CheckpointManager::new(dir.path(), false, clock_at("2026-01-01T00:00:00Z"));
        reloaded.init().unwrap();
        assert!(reloaded.latest().is_none());
    }
}
