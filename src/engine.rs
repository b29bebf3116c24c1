//! Snapshot engine façade (§4.6): orchestrates the diff, ignore, core store,
//! checkpoint, and consolidation modules behind one public surface.
//!
//! Mirrors `maw`'s top-level `Workspace`/`ManifoldCore` pattern: a single
//! owning type holds every sub-manager and is the *only* thing that reaches
//! into more than one of them at a time (§9 "Shared mutable state across
//! managers" redesign) — `ConsolidationManager` and `CheckpointManager`
//! never see each other, only `SnapshotEngine` does.
//!
//! Mutating operations (`create_snapshot`, `reverse_op`,
//! `consolidate_snapshots`, `cleanup`) serialize on `write_lock`, a plain
//! `Mutex<()>` held for the whole call (§5 "single mutex or actor-style
//! mailbox"). Read-only queries (`read_snapshot_diff`, `get_edit_history`,
//! `get_cache_stats`, `get_current_state`) never take it — they only read
//! through `CoreStore`/`CheckpointManager`'s own interior locking, plus a
//! `RwLock` over the engine's small cached-state triple
//! (`last_id`/`sequence_number`/`current_file_hashes`) so they can run
//! concurrently with each other while a mutating call holds the write side.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointManager, DriftReport};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, UnknownChangeStrategy};
use crate::consolidation::{ConsolidationManager, ConsolidationResult};
use crate::diff::{self, ReverseOptions};
use crate::error::EngineError;
use crate::hash::short_sha256_of_file;
use crate::id::{self, IdSource, OsEntropy};
use crate::ignore::{IgnoreInfo, IgnoreManager};
use crate::model::types::{
    FileHash, FileHashMap, IndexEntry, Snapshot, SnapshotCommon, SnapshotContext, SnapshotId, SnapshotMetadata,
    SnapshotRecord,
};
use crate::runtime::{ApplyOptions, EditingRuntime};
use crate::store::CoreStore;

/// The tool tag the engine stamps on a synthesized drift-absorption snapshot
/// (§2 "emits a synthetic 'unknown' snapshot first").
const UNKNOWN_CHANGE_TOOL: &str = "UnknownChangeIntegration";

/// The tool tag the engine stamps on the forward snapshot created by
/// [`SnapshotEngine::reverse_op`].
const REVERSE_OP_TOOL: &str = "ReverseOp";

/// Everything the engine needs to remember across calls, cheap to clone and
/// small enough to sit behind one `RwLock` (§5).
#[derive(Clone, Debug, Default)]
struct EngineState {
    last_id: Option<SnapshotId>,
    sequence_number: u64,
    current_file_hashes: FileHashMap,
}

/// One edit operation handed to [`SnapshotEngine::create_snapshot`] (§4.6,
/// §6 "Engine-facing operation payload").
#[derive(Clone, Debug)]
pub struct CreateSnapshotRequest {
    /// Free-form tag naming the operation that produced this edit.
    pub tool: String,
    /// Human-readable description of the edit's goal.
    pub description: String,
    /// Workspace-relative paths the operation touched, before ignore
    /// filtering.
    pub affected_files: Vec<PathBuf>,
    /// The unified diff describing the transition base→result. The caller
    /// has already applied this to the workspace; the engine only records
    /// it.
    pub diff: String,
    /// Caller-supplied context.
    pub context: SnapshotContext,
    /// Derived metadata about the edit.
    pub metadata: SnapshotMetadata,
}

/// Options controlling [`SnapshotEngine::reverse_op`] (§4.6).
#[derive(Clone, Copy, Debug, Default)]
pub struct ReverseRequest {
    /// Report what would happen without calling the runtime or writing a
    /// new snapshot.
    pub dry_run: bool,
    /// Persist the reverse snapshot even if the runtime reports it could
    /// not fully apply the reverse diff.
    pub force: bool,
}

/// Result of [`SnapshotEngine::reverse_op`] (§4.6).
#[derive(Clone, Debug)]
pub struct ReverseOutcome {
    /// Whether the reversal completed (always `true` for a dry run).
    pub ok: bool,
    /// Whether this was a dry run — no runtime call, no new snapshot.
    pub dry_run: bool,
    /// The reverse diff that was (or would have been) applied.
    pub reverse_diff: String,
    /// The paths the original snapshot covered.
    pub affected_files: Vec<PathBuf>,
    /// The id of the new forward "ReverseOp" snapshot, absent on a dry run.
    pub new_snapshot_id: Option<SnapshotId>,
}

/// Pagination and filter parameters for [`SnapshotEngine::get_edit_history`]
/// (§4.6).
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    /// Maximum number of items to return.
    pub limit: Option<usize>,
    /// Only snapshots created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only snapshots created at or before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Only snapshots whose `tool` matches exactly.
    pub tool_filter: Option<String>,
    /// Only snapshots touching a path containing this substring.
    pub file_filter: Option<String>,
    /// Whether to include each snapshot's full diff text in the result.
    pub include_diffs: bool,
}

/// One entry in a [`HistoryPage`].
#[derive(Clone, Debug)]
pub struct HistoryItem {
    /// The snapshot's identifier.
    pub id: SnapshotId,
    /// When it was created.
    pub timestamp: DateTime<Utc>,
    /// Its position in the append-only sequence.
    pub sequence_number: u64,
    /// The producing operation's tag.
    pub tool: String,
    /// Human-readable description of the edit's goal.
    pub description: String,
    /// Workspace-relative paths covered.
    pub affected_files: Vec<PathBuf>,
    /// The diff text, present only when the query asked for it.
    pub diff: Option<String>,
    /// Whether this entry is a consolidation result.
    pub is_consolidated: bool,
}

/// Result of [`SnapshotEngine::get_edit_history`] (§4.6).
#[derive(Clone, Debug)]
pub struct HistoryPage {
    /// The matching items, newest first, paginated to `query.limit`.
    pub items: Vec<HistoryItem>,
    /// Whether more matching items exist beyond this page.
    pub has_more: bool,
}

/// Result of [`SnapshotEngine::read_snapshot_diff`] (§4.6).
#[derive(Clone, Debug)]
pub struct DiffReadResult {
    /// The snapshot's forward diff, rehydrated if externalized.
    pub diff: String,
    /// The snapshot's reverse diff, if it has one.
    pub reverse_diff: Option<String>,
    /// Index-level metadata about the snapshot.
    pub snapshot_meta: IndexEntry,
}

/// Which snapshots [`SnapshotEngine::consolidate_snapshots`] should merge.
/// A sum type rather than two optional fields so "exactly one of `ids` /
/// `sequence_range`" (§4.6) is enforced by construction instead of a runtime
/// check.
#[derive(Clone, Debug)]
pub enum ConsolidateSelector {
    /// Merge exactly these ids, which must form a contiguous `+1` chain.
    Ids(Vec<SnapshotId>),
    /// Resolve to the ordered id list covering `[start, end]` and merge
    /// that.
    SequenceRange(u64, u64),
}

/// Request to [`SnapshotEngine::consolidate_snapshots`] (§4.6).
#[derive(Clone, Debug)]
pub struct ConsolidateRequest {
    /// Which snapshots to merge.
    pub selector: ConsolidateSelector,
    /// Short human-readable title, prefixed onto `description`.
    pub title: String,
    /// Longer explanation of why this range was merged.
    pub description: String,
    /// Whether to remove the originals from the index after committing the
    /// consolidated snapshot.
    pub delete_originals: bool,
}

/// Partial update applied by [`SnapshotEngine::update_config`] to the
/// *running* unknown-change and diff-externalization policy (§4.6). Distinct
/// from [`SnapshotEngine::set_config`], which replaces the whole typed
/// config.
#[derive(Clone, Debug, Default)]
pub struct ConfigUpdate {
    /// Turn unknown-change (drift) detection on or off.
    pub unknown_change_enabled: Option<bool>,
    /// Change what happens when drift is found.
    pub unknown_change_strategy: Option<UnknownChangeStrategy>,
}

/// Aggregated in-memory cache statistics (§4.6 `get_cache_stats`).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Total snapshots in the index (plain + consolidated).
    pub snapshot_count: usize,
    /// Of those, how many are consolidation results.
    pub consolidated_count: usize,
    /// Number of checkpoints recorded in `checkpoint-metadata.json`.
    pub checkpoint_count: usize,
}

/// A snapshot of the engine's cached running state (§4.6
/// `get_current_state`).
#[derive(Clone, Debug, Default)]
pub struct CurrentState {
    /// The most recently persisted snapshot's id, or `None` before the
    /// first snapshot.
    pub last_snapshot_id: Option<SnapshotId>,
    /// The next snapshot to be created will take this number, plus one.
    pub sequence_number: u64,
    /// The known-good fingerprint of every file the engine has recorded,
    /// used as the baseline for drift detection.
    pub current_file_hashes: FileHashMap,
}

/// Result of [`SnapshotEngine::validate_invariants`] (§8, §4.6 expanded
/// surface).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// `true` when `issues` is empty.
    pub valid: bool,
    /// Every violation found, human-readable.
    pub issues: Vec<String>,
}

/// Workspace-scoped, content-addressed edit history (§1, §4.6).
///
/// Owns its [`CoreStore`], [`CheckpointManager`], and [`IgnoreManager`]
/// exclusively for the lifetime of a workspace (§3 "Ownership");
/// [`ConsolidationManager`] is constructed on demand per call since it only
/// borrows the store, never owns state of its own.
pub struct SnapshotEngine {
    workspace_path: PathBuf,
    config: RwLock<EngineConfig>,
    store: CoreStore,
    checkpoints: CheckpointManager,
    ignore: Mutex<IgnoreManager>,
    clock: Arc<dyn Clock>,
    id_source: Arc<dyn IdSource>,
    write_lock: Mutex<()>,
    state: RwLock<EngineState>,
}

impl SnapshotEngine {
    /// Build an engine for `workspace_path` using the real system clock and
    /// OS entropy. Call [`Self::init`] before using it.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if `.continue-reasoning/config.toml`
    /// exists but fails to parse, or [`EngineError::Io`]/ignore errors from
    /// bootstrapping `.snapshotignore`.
    pub fn open(workspace_path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        Self::with_clock_and_entropy(workspace_path, Arc::new(SystemClock), Arc::new(OsEntropy))
    }

    /// Build an engine with injected time and entropy sources (§9 "Ambient
    /// time", "Randomness") — the constructor tests use to pin timestamps
    /// and ids.
    ///
    /// # Errors
    /// See [`Self::open`].
    pub fn with_clock_and_entropy(
        workspace_path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        id_source: Arc<dyn IdSource>,
    ) -> Result<Self, EngineError> {
        let workspace_path = workspace_path.into();
        let config = EngineConfig::load(&workspace_path)?;
        let store = CoreStore::new(&workspace_path, config.diff_storage.format, config.diff_storage.save_diff_files);
        let checkpoints = CheckpointManager::new(&workspace_path, config.checkpoint.save_latest_files, clock.clone());
        let ignore = IgnoreManager::init(&workspace_path, config.ignore.exclude_from_checking.clone())?;

        Ok(Self {
            workspace_path,
            config: RwLock::new(config),
            store,
            checkpoints,
            ignore: Mutex::new(ignore),
            clock,
            id_source,
            write_lock: Mutex::new(()),
            state: RwLock::new(EngineState::default()),
        })
    }

    /// Prepare all sub-managers' on-disk layout, bootstrap an initial
    /// checkpoint if none exists, and load cached state from the latest
    /// snapshot (§4.6 `init`). Idempotent.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if any sub-manager's directories cannot
    /// be created, or [`EngineError::Integrity`] if the latest snapshot's
    /// file is indexed but unreadable.
    pub fn init(&self) -> Result<(), EngineError> {
        self.store.init()?;
        self.checkpoints.init()?;

        if self.checkpoints.latest().is_none() {
            let id = self.checkpoints.create_initial(|| self.generate_id(), &|p, is_dir| self.is_path_ignored(p, is_dir))?;
            info!(checkpoint_id = %id, "bootstrapped initial checkpoint");
        }

        let mut state = self.write_state();
        match self.store.latest() {
            Some(entry) => {
                let record = self.store.load(&entry.id)?.ok_or_else(|| EngineError::Integrity {
                    issues: vec![format!("index entry {} has no backing snapshot file", entry.id)],
                })?;
                state.last_id = Some(entry.id);
                state.sequence_number = entry.sequence_number;
                state.current_file_hashes = record.common().result_file_hashes.clone();
            }
            None => {
                state.last_id = None;
                state.sequence_number = 0;
                state.current_file_hashes = self.checkpoints.latest().map(|c| c.file_hashes).unwrap_or_default();
            }
        }
        Ok(())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_config(&self) -> EngineConfig {
        self.config.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn generate_id(&self) -> String {
        let existing: HashSet<String> = self.store.index().iter().map(|e| e.id.as_str().to_owned()).collect();
        id::generate_unique_id(self.id_source.as_ref(), &existing)
    }

    /// Whether `path` matches the workspace's ignore rules. Handed to
    /// [`CheckpointManager`] as a borrowed predicate rather than giving it
    /// its own reference to `self.ignore` — the two sub-managers stay
    /// decoupled (§9 "Shared mutable state across managers" redesign) while
    /// the checkpoint baseline and drift-candidate scans still honor
    /// `.snapshotignore` and `config.ignore.exclude_from_checking`.
    fn is_path_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.ignore.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_ignored(path, is_dir)
    }

    fn calc_hashes(&self, paths: &[PathBuf]) -> FileHashMap {
        paths
            .iter()
            .map(|p| (p.clone(), FileHash::from(short_sha256_of_file(&self.workspace_path.join(p)))))
            .collect()
    }

    fn total_size_bytes(&self, paths: &[PathBuf]) -> u64 {
        paths.iter().filter_map(|p| std::fs::metadata(self.workspace_path.join(p)).ok()).map(|m| m.len()).sum()
    }

    /// Record one edit operation as a new immutable snapshot (§4.6
    /// `create_snapshot`).
    ///
    /// Runs unknown-change detection first (when enabled): drift outside
    /// `request.affected_files` is either absorbed into a synthetic
    /// `UnknownChangeIntegration` snapshot (`warn`/`auto_fix`) or rejected
    /// outright (`error`). A diff with no added or removed lines is
    /// rejected rather than recorded as a silent no-op, so every snapshot
    /// on disk corresponds to a real content transition (§8 "boundary
    /// behaviors", resolved in `DESIGN.md`).
    ///
    /// # Errors
    /// Returns [`EngineError::AllFilesIgnored`] if every declared file
    /// matches an ignore pattern, [`EngineError::InvalidInput`] if the diff
    /// produces no change, [`EngineError::UnknownDrift`] if drift is found
    /// under the `error` strategy, or [`EngineError::Diff`]/[`EngineError::Io`]
    /// from the underlying operations.
    pub fn create_snapshot(&self, request: CreateSnapshotRequest) -> Result<SnapshotId, EngineError> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let kept = self.ignore.lock().unwrap_or_else(std::sync::PoisonError::into_inner).filter_ignored(&request.affected_files);
        if kept.is_empty() {
            return Err(EngineError::AllFilesIgnored { files: request.affected_files });
        }

        let (added, removed) = diff::count_changes(&request.diff)?;
        if added == 0 && removed == 0 {
            return Err(EngineError::InvalidInput { message: "diff produces no change".to_owned() });
        }

        let config = self.read_config();
        let (mut parent_id, mut sequence) = {
            let state = self.read_state();
            (state.last_id.clone(), state.sequence_number)
        };

        if config.unknown_change.enabled {
            let report =
                self.checkpoints.detect_unknown(&kept, &|p, is_dir| self.is_path_ignored(p, is_dir), |paths| self.calc_hashes(paths));
            if report.has_changes {
                match config.unknown_change.strategy {
                    UnknownChangeStrategy::Error => {
                        return Err(EngineError::UnknownDrift { files: report.changes.iter().map(|c| c.path.clone()).collect() });
                    }
                    UnknownChangeStrategy::Warn | UnknownChangeStrategy::AutoFix => {
                        let (absorbed_id, absorbed_seq) = self.absorb_drift(&report, parent_id.clone(), sequence)?;
                        parent_id = Some(absorbed_id);
                        sequence = absorbed_seq;
                    }
                }
            }
        }

        let base_file_hashes: FileHashMap = {
            let state = self.read_state();
            kept.iter().map(|p| (p.clone(), state.current_file_hashes.get(p).cloned().unwrap_or_default())).collect()
        };
        let result_file_hashes = self.calc_hashes(&kept);

        let id = SnapshotId::new(&self.generate_id())?;
        let reverse_diff = diff::reverse(&request.diff, &ReverseOptions::default()).ok();
        let next_sequence = sequence + 1;

        let record = SnapshotRecord::Plain(Snapshot {
            common: SnapshotCommon {
                id: id.clone(),
                timestamp: self.clock.now(),
                sequence_number: next_sequence,
                previous_snapshot_id: parent_id,
                tool: request.tool,
                description: request.description,
                affected_files: kept.clone(),
                diff: request.diff,
                reverse_diff,
                base_file_hashes,
                result_file_hashes,
                context: request.context,
                metadata: request.metadata,
                diff_path: None,
                reverse_diff_path: None,
            },
            extra: serde_json::Map::new(),
        });
        self.store.save(record)?;

        let checkpoint_id = self.checkpoints.create_after(id.as_str(), &kept, || self.generate_id())?;
        let checkpoint = self.checkpoints.load(Some(checkpoint_id.as_str()))?.ok_or_else(|| EngineError::Integrity {
            issues: vec![format!("checkpoint {checkpoint_id} vanished immediately after creation")],
        })?;

        {
            let mut state = self.write_state();
            state.last_id = Some(id.clone());
            state.sequence_number = next_sequence;
            state.current_file_hashes = checkpoint.file_hashes;
        }

        info!(id = %id, sequence = next_sequence, "created snapshot");
        Ok(id)
    }

    /// Persist a synthetic `UnknownChangeIntegration` snapshot covering
    /// `report`'s drifted paths, create a checkpoint for them, and return
    /// the new `(parent_id, sequence_number)` the caller's intended
    /// snapshot should chain onto (§2 "emits a synthetic 'unknown' snapshot
    /// first", §8 scenario 2).
    fn absorb_drift(&self, report: &DriftReport, parent_id: Option<SnapshotId>, sequence: u64) -> Result<(SnapshotId, u64), EngineError> {
        let drifted_paths: Vec<PathBuf> = report.changes.iter().map(|c| c.path.clone()).collect();
        let base_file_hashes: FileHashMap = report.changes.iter().map(|c| (c.path.clone(), c.baseline_hash.clone())).collect();
        let result_file_hashes: FileHashMap = report.changes.iter().map(|c| (c.path.clone(), c.current_hash.clone())).collect();
        let diff_text = report.generated_diff.clone().unwrap_or_default();
        let reverse_diff = diff::reverse(&diff_text, &ReverseOptions::default()).ok();
        let (added, removed) = diff::count_changes(&diff_text).unwrap_or((0, 0));

        let id = SnapshotId::new(&self.generate_id())?;
        let next_sequence = sequence + 1;
        let description = format!(
            "Unknown changes detected in: {}",
            drifted_paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
        );

        let record = SnapshotRecord::Plain(Snapshot {
            common: SnapshotCommon {
                id: id.clone(),
                timestamp: self.clock.now(),
                sequence_number: next_sequence,
                previous_snapshot_id: parent_id,
                tool: UNKNOWN_CHANGE_TOOL.to_owned(),
                description,
                affected_files: drifted_paths.clone(),
                diff: diff_text,
                reverse_diff,
                base_file_hashes,
                result_file_hashes,
                context: SnapshotContext {
                    session_id: "engine".to_owned(),
                    workspace_path: self.workspace_path.clone(),
                    tool_params: None,
                },
                metadata: SnapshotMetadata {
                    files_size_bytes: self.total_size_bytes(&drifted_paths),
                    lines_changed: added + removed,
                    execution_time_ms: 0,
                },
                diff_path: None,
                reverse_diff_path: None,
            },
            extra: serde_json::Map::new(),
        });
        self.store.save(record)?;

        let checkpoint_id = self.checkpoints.create_after(id.as_str(), &drifted_paths, || self.generate_id())?;
        let checkpoint = self.checkpoints.load(Some(checkpoint_id.as_str()))?.ok_or_else(|| EngineError::Integrity {
            issues: vec![format!("checkpoint {checkpoint_id} vanished immediately after creation")],
        })?;
        {
            let mut state = self.write_state();
            state.last_id = Some(id.clone());
            state.sequence_number = next_sequence;
            for (path, hash) in &checkpoint.file_hashes {
                state.current_file_hashes.insert(path.clone(), hash.clone());
            }
        }

        warn!(id = %id, files = drifted_paths.len(), "absorbed unknown workspace drift into synthetic snapshot");
        Ok((id, next_sequence))
    }

    /// Fetch a snapshot's diff text, rehydrating it if externalized (§4.6
    /// `read_snapshot_diff`).
    ///
    /// # Errors
    /// Returns [`EngineError::Io`]/[`EngineError::Integrity`] if the
    /// snapshot is indexed but its backing file is unreadable or corrupt.
    pub fn read_snapshot_diff(&self, id: &SnapshotId) -> Result<Option<DiffReadResult>, EngineError> {
        let Some(record) = self.store.load(id)? else {
            return Ok(None);
        };
        let snapshot_meta = IndexEntry {
            id: record.id().clone(),
            timestamp: record.timestamp(),
            tool: record.common().tool.clone(),
            affected_files: record.common().affected_files.clone(),
            sequence_number: record.sequence_number(),
            previous_snapshot_id: record.previous_snapshot_id().cloned(),
            consolidated: record.is_consolidated(),
        };
        Ok(Some(DiffReadResult {
            diff: record.common().diff.clone(),
            reverse_diff: record.common().reverse_diff.clone(),
            snapshot_meta,
        }))
    }

    /// Page through the workspace's history, newest first (§4.6
    /// `get_edit_history`).
    ///
    /// # Errors
    /// Returns [`EngineError::Io`]/[`EngineError::Integrity`] if an indexed
    /// snapshot's backing file is unreadable.
    pub fn get_edit_history(&self, query: &HistoryQuery) -> Result<HistoryPage, EngineError> {
        let ids = self.store.ids_by_time();
        let mut items = Vec::new();
        let mut has_more = false;

        for id in ids.into_iter().rev() {
            let Some(record) = self.store.load(&id)? else { continue };
            let common = record.common();
            if query.since.is_some_and(|since| common.timestamp < since) {
                continue;
            }
            if query.until.is_some_and(|until| common.timestamp > until) {
                continue;
            }
            if let Some(tool) = &query.tool_filter {
                if &common.tool != tool {
                    continue;
                }
            }
            if let Some(pattern) = &query.file_filter {
                if !common.affected_files.iter().any(|p| p.to_string_lossy().contains(pattern.as_str())) {
                    continue;
                }
            }
            if let Some(limit) = query.limit {
                if items.len() >= limit {
                    has_more = true;
                    break;
                }
            }
            items.push(HistoryItem {
                id: common.id.clone(),
                timestamp: common.timestamp,
                sequence_number: common.sequence_number,
                tool: common.tool.clone(),
                description: common.description.clone(),
                affected_files: common.affected_files.clone(),
                diff: query.include_diffs.then(|| common.diff.clone()),
                is_consolidated: record.is_consolidated(),
            });
        }

        Ok(HistoryPage { items, has_more })
    }

    /// Reverse a snapshot by re-applying its inverse diff through `runtime`
    /// (§4.6 `reverse_op`).
    ///
    /// Does not rewrite any downstream parent pointer: the new snapshot is
    /// appended as a forward extension of the chain whose diff *is* the
    /// reverse diff, per `spec.md`'s explicit adoption of that behavior
    /// (§8 "Open questions", resolved in `DESIGN.md`).
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidInput`] if `id` is unknown or has no
    /// `reverse_diff`, or [`EngineError::Runtime`] if the runtime fails to
    /// apply it and `options.force` is not set.
    pub fn reverse_op(&self, id: &SnapshotId, options: ReverseRequest, runtime: &dyn EditingRuntime) -> Result<ReverseOutcome, EngineError> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let record = self.store.load(id)?.ok_or_else(|| EngineError::InvalidInput { message: format!("unknown snapshot id {id}") })?;
        let reverse_diff = record
            .common()
            .reverse_diff
            .clone()
            .ok_or_else(|| EngineError::InvalidInput { message: format!("snapshot {id} has no reverse_diff and cannot be reversed") })?;
        let affected_files = record.common().affected_files.clone();

        if options.dry_run {
            return Ok(ReverseOutcome {
                ok: true,
                dry_run: true,
                reverse_diff,
                affected_files,
                new_snapshot_id: None,
            });
        }

        let apply_outcome = runtime.apply_unified_diff(
            &reverse_diff,
            &ApplyOptions {
                base_dir: self.workspace_path.clone(),
                dry_run: false,
            },
        )?;
        if !apply_outcome.ok && !options.force {
            return Err(EngineError::Runtime(crate::runtime::RuntimeError {
                message: apply_outcome.message.unwrap_or_else(|| "editing runtime reported failure".to_owned()),
            }));
        }

        let (parent_id, sequence) = {
            let state = self.read_state();
            (state.last_id.clone(), state.sequence_number)
        };
        let base_file_hashes: FileHashMap = {
            let state = self.read_state();
            affected_files.iter().map(|p| (p.clone(), state.current_file_hashes.get(p).cloned().unwrap_or_default())).collect()
        };
        let result_file_hashes = self.calc_hashes(&affected_files);
        let (added, removed) = diff::count_changes(&reverse_diff).unwrap_or((0, 0));
        let forward_reverse = diff::reverse(&reverse_diff, &ReverseOptions::default()).ok();

        let new_id = SnapshotId::new(&self.generate_id())?;
        let next_sequence = sequence + 1;
        let record_new = SnapshotRecord::Plain(Snapshot {
            common: SnapshotCommon {
                id: new_id.clone(),
                timestamp: self.clock.now(),
                sequence_number: next_sequence,
                previous_snapshot_id: parent_id,
                tool: REVERSE_OP_TOOL.to_owned(),
                description: format!("ReverseOp: {}", record.common().description),
                affected_files: affected_files.clone(),
                diff: reverse_diff.clone(),
                reverse_diff: forward_reverse,
                base_file_hashes,
                result_file_hashes,
                context: record.common().context.clone(),
                metadata: SnapshotMetadata {
                    files_size_bytes: self.total_size_bytes(&affected_files),
                    lines_changed: added + removed,
                    execution_time_ms: 0,
                },
                diff_path: None,
                reverse_diff_path: None,
            },
            extra: serde_json::Map::new(),
        });
        self.store.save(record_new)?;

        let checkpoint_id = self.checkpoints.create_after(new_id.as_str(), &affected_files, || self.generate_id())?;
        let checkpoint = self.checkpoints.load(Some(checkpoint_id.as_str()))?.ok_or_else(|| EngineError::Integrity {
            issues: vec![format!("checkpoint {checkpoint_id} vanished immediately after creation")],
        })?;
        {
            let mut state = self.write_state();
            state.last_id = Some(new_id.clone());
            state.sequence_number = next_sequence;
            state.current_file_hashes = checkpoint.file_hashes;
        }

        info!(id = %new_id, reversed = %id, "reversed snapshot");
        Ok(ReverseOutcome {
            ok: true,
            dry_run: false,
            reverse_diff,
            affected_files,
            new_snapshot_id: Some(new_id),
        })
    }

    /// Merge a contiguous range of snapshots into one (§4.6
    /// `consolidate_snapshots`).
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidInput`] if the selector resolves to an
    /// empty or non-contiguous range, or propagates
    /// [`crate::consolidation::ConsolidationError`].
    pub fn consolidate_snapshots(&self, request: ConsolidateRequest) -> Result<ConsolidationResult, EngineError> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let ids = match request.selector {
            ConsolidateSelector::Ids(ids) => ids,
            ConsolidateSelector::SequenceRange(start, end) => self.get_snapshot_ids_by_sequence_range(start, end)?,
        };
        let description = if request.title.is_empty() {
            request.description
        } else {
            format!("{}: {}", request.title, request.description)
        };

        let manager = ConsolidationManager::new(&self.store);
        let now = self.clock.now();
        let result = manager.consolidate(&ids, &description, request.delete_originals, now, || self.generate_id())?;

        if let Some(latest) = self.store.latest() {
            let mut state = self.write_state();
            state.last_id = Some(latest.id);
            state.sequence_number = latest.sequence_number;
        }

        Ok(result)
    }

    /// Ids, in sequence order, of every snapshot whose `sequence_number`
    /// falls in `[start, end]` (§4.6).
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidInput`] if `start > end`.
    pub fn get_snapshot_ids_by_sequence_range(&self, start: u64, end: u64) -> Result<Vec<SnapshotId>, EngineError> {
        if start > end {
            return Err(EngineError::InvalidInput { message: format!("sequence range start {start} is after end {end}") });
        }
        let mut matched: Vec<IndexEntry> = self.store.index().into_iter().filter(|e| e.sequence_number >= start && e.sequence_number <= end).collect();
        matched.sort_by_key(|e| e.sequence_number);
        Ok(matched.into_iter().map(|e| e.id).collect())
    }

    /// Prune checkpoints older than `older_than`, or older than the
    /// configured retention window when absent (§4.6 `cleanup`).
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] if `checkpoint-metadata.json` cannot be
    /// persisted after pruning.
    pub fn cleanup(&self, older_than: Option<DateTime<Utc>>) -> Result<usize, EngineError> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let cutoff = older_than.unwrap_or_else(|| {
            let retention_days = self.read_config().checkpoint.retention_days;
            self.clock.now() - chrono::Duration::days(i64::try_from(retention_days).unwrap_or(i64::MAX))
        });
        Ok(self.checkpoints.cleanup(cutoff)?)
    }

    /// Aggregated in-memory index/checkpoint cache statistics (§4.6
    /// `get_cache_stats`).
    #[must_use]
    pub fn get_cache_stats(&self) -> CacheStats {
        let index = self.store.index();
        CacheStats {
            snapshot_count: index.len(),
            consolidated_count: index.iter().filter(|e| e.consolidated).count(),
            checkpoint_count: self.checkpoints.checkpoint_count(),
        }
    }

    /// The engine's cached running state (§4.6 `get_current_state`).
    #[must_use]
    pub fn get_current_state(&self) -> CurrentState {
        let state = self.read_state();
        CurrentState {
            last_snapshot_id: state.last_id.clone(),
            sequence_number: state.sequence_number,
            current_file_hashes: state.current_file_hashes.clone(),
        }
    }

    /// Apply a partial update to the running unknown-change policy (§4.6
    /// `update_config`). Diff-externalization and checkpoint settings are
    /// read-only here; change them via [`Self::set_config`] before the next
    /// [`Self::open`] (the core store and checkpoint manager snapshot those
    /// fields at construction, matching `maw::config`'s load-once-per-process
    /// convention — see `DESIGN.md`).
    pub fn update_config(&self, update: ConfigUpdate) {
        let mut config = self.config.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(enabled) = update.unknown_change_enabled {
            config.unknown_change.enabled = enabled;
        }
        if let Some(strategy) = update.unknown_change_strategy {
            config.unknown_change.strategy = strategy;
        }
    }

    /// The running configuration (§4.6 `get_config`).
    #[must_use]
    pub fn get_config(&self) -> EngineConfig {
        self.read_config()
    }

    /// Alias for [`Self::get_config`], matching `maw::config::ManifoldConfig::load`'s
    /// naming (§4.6 expanded façade surface).
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.read_config()
    }

    /// Replace the whole running config (§4.6 expanded façade surface).
    /// Like [`Self::update_config`], diff-storage and checkpoint settings
    /// only take effect for sub-managers constructed after this call.
    pub fn set_config(&self, config: EngineConfig) {
        *self.config.write().unwrap_or_else(std::sync::PoisonError::into_inner) = config;
    }

    /// The absolute path to the workspace this engine serves.
    #[must_use]
    pub fn get_workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// Filter `paths` down to those not matched by any ignore pattern
    /// (§4.6 `filter_ignored_files`).
    #[must_use]
    pub fn filter_ignored_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        self.ignore.lock().unwrap_or_else(std::sync::PoisonError::into_inner).filter_ignored(paths)
    }

    /// Diagnostic snapshot of the ignore manager's state (§4.6
    /// `get_ignore_info`).
    #[must_use]
    pub fn get_ignore_info(&self) -> IgnoreInfo {
        self.ignore.lock().unwrap_or_else(std::sync::PoisonError::into_inner).info()
    }

    /// Re-read `.snapshotignore` and recompute ignore rules (§4.6
    /// `reload_ignore_rules`).
    ///
    /// # Errors
    /// Propagates [`crate::ignore::IgnoreError`] if a pattern fails to
    /// compile.
    pub fn reload_ignore_rules(&self) -> Result<(), EngineError> {
        self.ignore.lock().unwrap_or_else(std::sync::PoisonError::into_inner).reload()?;
        Ok(())
    }

    /// Re-check the §8 quantified invariants (sequence density, chain
    /// integrity, hash continuity, cache/disk parity) over the current
    /// index, reporting every violation instead of panicking (§4.6 expanded
    /// façade surface).
    ///
    /// # Errors
    /// Returns [`EngineError::Io`]/[`EngineError::Integrity`] only if the
    /// store itself cannot be read; a found invariant violation is reported
    /// in the returned [`IntegrityReport`], not as an `Err`.
    pub fn validate_invariants(&self) -> Result<IntegrityReport, EngineError> {
        let mut issues = Vec::new();
        let mut index = self.store.index();
        index.sort_by_key(|e| e.sequence_number);

        let n = index.len() as u64;
        let present: HashSet<u64> = index.iter().map(|e| e.sequence_number).collect();
        for expected in 1..=n {
            if !present.contains(&expected) {
                issues.push(format!("sequence gap: missing {expected}"));
            }
        }

        let mut prev: Option<SnapshotRecord> = None;
        for entry in &index {
            let Some(record) = self.store.load(&entry.id)? else {
                issues.push(format!("index entry {} has no backing snapshot file (cache/disk parity)", entry.id));
                continue;
            };

            if let Some(parent_id) = record.previous_snapshot_id() {
                match &prev {
                    Some(p) if p.id() == parent_id && p.sequence_number() + 1 == record.sequence_number() => {}
                    _ => issues.push(format!("snapshot {} parent pointer {} is inconsistent with sequence order", record.id(), parent_id)),
                }
                if let Some(p) = &prev {
                    for (path, result_hash) in &p.common().result_file_hashes {
                        if let Some(base_hash) = record.common().base_file_hashes.get(path) {
                            if base_hash != result_hash {
                                issues.push(format!(
                                    "hash discontinuity for {}: {} result={} vs {} base={}",
                                    path.display(),
                                    p.id(),
                                    result_hash,
                                    record.id(),
                                    base_hash
                                ));
                            }
                        }
                    }
                }
            } else if prev.is_some() {
                issues.push(format!("snapshot {} has no parent but is not first in sequence order", record.id()));
            }

            prev = Some(record);
        }

        Ok(IntegrityReport { valid: issues.is_empty(), issues })
    }
}
