//! Consolidation manager (§4.5): merge a contiguous range of snapshots into
//! one, renumber successors, and keep the chain intact.
//!
//! Operates purely over owned [`SnapshotRecord`] values and a [`CoreStore`]
//! handle — per §9's "explicit request/response between managers" redesign,
//! this module never reaches into another manager's cache; it reads through
//! `CoreStore`'s public accessors and writes back through `save`/`remove`.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::diff::{self, DiffError, MergeOptions};
use crate::model::types::{
    ConsolidatedSnapshot, ConsolidationMetadata, FileHashMap, IndexEntry, SnapshotCommon, SnapshotId, SnapshotRecord,
    ValidationError,
};
use crate::store::{CoreStore, StoreError};

/// Failure modes for consolidation.
#[derive(Debug)]
pub enum ConsolidationError {
    /// The requested range was empty, not sorted, or not a strict `+1`
    /// chain of existing snapshots.
    InvalidRange {
        /// What was wrong with the requested range.
        reason: String,
    },
    /// Merging the range's diffs failed under `ConflictResolution::Fail`.
    UnresolvedConflicts {
        /// One description per conflicting hunk pair.
        conflicts: Vec<String>,
    },
    /// The merge itself reported a [`DiffError`].
    Diff(DiffError),
    /// A filesystem operation failed while persisting the result.
    Store(StoreError),
}

impl fmt::Display for ConsolidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRange { reason } => write!(f, "invalid consolidation range: {reason}"),
            Self::UnresolvedConflicts { conflicts } => {
                write!(f, "consolidation aborted, {} unresolved conflict(s): {}", conflicts.len(), conflicts.join("; "))
            }
            Self::Diff(e) => write!(f, "consolidation diff error: {e}"),
            Self::Store(e) => write!(f, "consolidation storage error: {e}"),
        }
    }
}

impl std::error::Error for ConsolidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Diff(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::InvalidRange { .. } | Self::UnresolvedConflicts { .. } => None,
        }
    }
}

impl From<DiffError> for ConsolidationError {
    fn from(e: DiffError) -> Self {
        Self::Diff(e)
    }
}

impl From<StoreError> for ConsolidationError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ValidationError> for ConsolidationError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidRange { reason: e.to_string() }
    }
}

/// Outcome of a successful [`ConsolidationManager::consolidate`] call.
#[derive(Clone, Debug)]
pub struct ConsolidationResult {
    /// The new consolidated record's id.
    pub consolidated_id: SnapshotId,
    /// The originals' ids, in order, that were folded in.
    pub consolidated_from: Vec<SnapshotId>,
    /// How many successor snapshots were renumbered.
    pub renumbered_count: usize,
    /// Non-fatal diff-merge warnings (e.g. files skipped under `Skip`).
    pub warnings: Vec<String>,
}

/// Selection filters for [`ConsolidationManager::candidates`].
#[derive(Clone, Debug, Default)]
pub struct CandidateCriteria {
    /// Only consider snapshots older than this instant.
    pub max_age: Option<DateTime<Utc>>,
    /// Only consider snapshots whose `tool` matches.
    pub tool_filter: Option<String>,
    /// Only consider snapshots touching a path containing this substring.
    pub file_pattern_filter: Option<String>,
    /// Never return fewer than this many snapshots' worth of a candidate
    /// range (a candidate group smaller than this is dropped).
    pub min_snapshots: usize,
    /// Never return more than this many snapshots in a single candidate
    /// range (longer runs are truncated to this length).
    pub max_snapshots: usize,
}

/// Aggregated on-disk size statistics distinguishing consolidated from
/// plain snapshots (§4.5 `storage_stats`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of snapshots, of either kind.
    pub total_count: usize,
    /// Number of consolidated snapshots.
    pub consolidated_count: usize,
    /// Approximate bytes occupied by plain snapshots' diff text.
    pub plain_bytes: u64,
    /// Approximate bytes occupied by consolidated snapshots' diff text.
    pub consolidated_bytes: u64,
}

/// One problem found by [`validate_sequence_continuity_with_consolidation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContinuityIssue {
    /// Sequence numbers are not the dense set `{1..N}`.
    Gap {
        /// The missing sequence number.
        missing: u64,
    },
    /// A snapshot's parent does not have `sequence_number - 1`. Also covers
    /// a consolidated range's successor failing to point at the
    /// consolidated id, since that id's `sequence_number` is
    /// `sequence_range.0`.
    MispointedParent {
        /// The snapshot whose parent pointer is wrong.
        id: SnapshotId,
    },
}

/// Result of [`validate_sequence_continuity_with_consolidation`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContinuityReport {
    /// Whether `issues` is empty.
    pub valid: bool,
    /// Every issue found.
    pub issues: Vec<ContinuityIssue>,
}

/// Merges contiguous snapshot ranges into one and keeps the chain intact
/// (§4.5).
pub struct ConsolidationManager<'a> {
    store: &'a CoreStore,
}

impl<'a> ConsolidationManager<'a> {
    /// Build a manager operating over `store`.
    #[must_use]
    pub fn new(store: &'a CoreStore) -> Self {
        Self { store }
    }

    /// Merge `ids` (must be a contiguous `+1` sequence chain, each pointing
    /// to its immediate predecessor) into one [`ConsolidatedSnapshot`],
    /// renumber every later snapshot, and delete the originals.
    ///
    /// All-or-nothing: if the merge has unresolved conflicts under
    /// `ConflictResolution::Fail`, no on-disk mutation occurs. Once the
    /// consolidated snapshot is durably written the operation is considered
    /// committed; a failure during renumbering is logged but does not roll
    /// back the commit (§4.5 "Failure semantics").
    ///
    /// # Errors
    /// Returns [`ConsolidationError::InvalidRange`] if `ids` is empty, not
    /// sorted by sequence number, or not a strict `+1` chain; returns
    /// [`ConsolidationError::UnresolvedConflicts`] if the merged diff has
    /// conflicts under the fail policy; returns
    /// [`ConsolidationError::Store`] if persistence fails.
    pub fn consolidate(
        &self,
        ids: &[SnapshotId],
        description: &str,
        delete_originals: bool,
        now: DateTime<Utc>,
        id_gen: impl FnOnce() -> String,
    ) -> Result<ConsolidationResult, ConsolidationError> {
        let originals = self.load_and_validate_chain(ids)?;
        let first = originals.first().expect("validated non-empty");
        let last = originals.last().expect("validated non-empty");

        let diffs: Vec<String> = originals.iter().map(|r| r.common().diff.clone()).collect();
        let merge_result = diff::merge(
            &diffs,
            &MergeOptions {
                preserve_git_headers: true,
                conflict_resolution: diff::ConflictResolution::Concatenate,
            },
        )?;
        if !merge_result.ok {
            return Err(ConsolidationError::UnresolvedConflicts {
                conflicts: merge_result.conflicts.iter().map(|c| format!("{}: {} vs {}", c.path, c.first_hunk, c.second_hunk)).collect(),
            });
        }

        let mut affected_files: Vec<std::path::PathBuf> = Vec::new();
        for record in &originals {
            for path in &record.common().affected_files {
                if !affected_files.contains(path) {
                    affected_files.push(path.clone());
                }
            }
        }

        let total_lines_changed: u64 = originals.iter().map(|r| r.common().metadata.lines_changed).sum();
        let space_freed: u64 = originals.iter().map(|r| r.common().diff.len() as u64).sum();
        let original_count = originals.len() as u64;

        let first_common = &first.common();
        let consolidated = SnapshotRecord::Consolidated(ConsolidatedSnapshot {
            common: SnapshotCommon {
                id: SnapshotId::new(&id_gen())?,
                timestamp: now,
                sequence_number: first_common.sequence_number,
                previous_snapshot_id: first_common.previous_snapshot_id.clone(),
                tool: "ConsolidateSnapshots".to_owned(),
                description: description.to_owned(),
                affected_files,
                diff: merge_result.merged_text,
                reverse_diff: None,
                base_file_hashes: first_common.base_file_hashes.clone(),
                result_file_hashes: last.common().result_file_hashes.clone(),
                context: first_common.context.clone(),
                metadata: crate::model::types::SnapshotMetadata {
                    files_size_bytes: last.common().metadata.files_size_bytes,
                    lines_changed: total_lines_changed,
                    execution_time_ms: originals.iter().map(|r| r.common().metadata.execution_time_ms).sum(),
                },
                diff_path: None,
                reverse_diff_path: None,
            },
            sequence_range: (first_common.sequence_number, last.common().sequence_number),
            consolidated_from: originals.iter().map(|r| r.id().clone()).collect(),
            consolidation_metadata: ConsolidationMetadata {
                original_count,
                total_lines_changed,
                consolidation_timestamp: now,
                space_freed,
            },
            extra: serde_json::Map::new(),
        });

        let consolidated_entry = self.store.save(consolidated)?;
        info!(
            id = %consolidated_entry.id,
            range_start = first_common.sequence_number,
            range_end = last.common().sequence_number,
            "consolidated snapshot range"
        );

        let shift = last.common().sequence_number - first_common.sequence_number;
        let renumbered_count = self.renumber_and_repoint(
            last.common().sequence_number,
            shift,
            &consolidated_entry.id,
            &originals.iter().map(|r| r.id().clone()).collect::<Vec<_>>(),
        )?;

        if delete_originals {
            for record in &originals {
                if let Err(e) = self.store.remove(record.id()) {
                    warn!(id = %record.id(), error = %e, "failed to remove consolidated original, will be healed on next reload");
                }
            }
        }

        Ok(ConsolidationResult {
            consolidated_id: consolidated_entry.id,
            consolidated_from: originals.iter().map(|r| r.id().clone()).collect(),
            renumbered_count,
            warnings: merge_result.warnings,
        })
    }

    fn load_and_validate_chain(&self, ids: &[SnapshotId]) -> Result<Vec<SnapshotRecord>, ConsolidationError> {
        if ids.is_empty() {
            return Err(ConsolidationError::InvalidRange {
                reason: "no snapshot ids given".to_owned(),
            });
        }
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.store.load(id).map_err(ConsolidationError::Store)?.ok_or_else(|| ConsolidationError::InvalidRange {
                reason: format!("unknown snapshot id {id}"),
            })?;
            records.push(record);
        }
        records.sort_by_key(|r| r.common().sequence_number);

        for window in records.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if next.common().sequence_number != prev.common().sequence_number + 1 {
                return Err(ConsolidationError::InvalidRange {
                    reason: format!(
                        "sequence {} does not immediately follow {}",
                        next.common().sequence_number,
                        prev.common().sequence_number
                    ),
                });
            }
            if next.common().previous_snapshot_id.as_ref() != Some(prev.id()) {
                return Err(ConsolidationError::InvalidRange {
                    reason: format!("snapshot {} does not point at its immediate predecessor {}", next.id(), prev.id()),
                });
            }
        }
        Ok(records)
    }

    /// Subtract `shift` from every persisted snapshot with
    /// `sequence_number > range_end`, and repoint the first snapshot whose
    /// parent was one of `consolidated_from` at `consolidated_id`.
    fn renumber_and_repoint(
        &self,
        range_end: u64,
        shift: u64,
        consolidated_id: &SnapshotId,
        consolidated_from: &[SnapshotId],
    ) -> Result<usize, ConsolidationError> {
        let mut renumbered = 0usize;
        let mut repointed = false;
        let index = self.store.index();
        for entry in &index {
            if entry.sequence_number <= range_end {
                continue;
            }
            let Some(mut record) = self.store.load(&entry.id)? else {
                continue;
            };
            let mut changed = false;
            if !repointed && record.previous_snapshot_id().is_some_and(|p| consolidated_from.contains(p)) {
                record.common_mut().previous_snapshot_id = Some(consolidated_id.clone());
                changed = true;
                repointed = true;
            }
            if shift > 0 {
                record.common_mut().sequence_number -= shift;
                changed = true;
                renumbered += 1;
            }
            if changed {
                self.store.save(record)?;
            }
        }
        Ok(renumbered)
    }

    /// Filter `all` to contiguous, parent-linked runs matching `criteria`,
    /// clamped to `[min_snapshots, max_snapshots]` (§4.5 `candidates`).
    #[must_use]
    pub fn candidates(&self, all: &[IndexEntry], criteria: &CandidateCriteria) -> Vec<Vec<SnapshotId>> {
        let mut sorted: Vec<&IndexEntry> = all.iter().filter(|e| !e.consolidated).collect();
        sorted.sort_by_key(|e| e.sequence_number);

        let matches = |e: &IndexEntry| -> bool {
            if criteria.max_age.is_some_and(|max_age| e.timestamp > max_age) {
                return false;
            }
            if let Some(tool) = &criteria.tool_filter {
                if &e.tool != tool {
                    return false;
                }
            }
            if let Some(pattern) = &criteria.file_pattern_filter {
                if !e.affected_files.iter().any(|p| p.to_string_lossy().contains(pattern.as_str())) {
                    return false;
                }
            }
            true
        };

        let mut groups: Vec<Vec<SnapshotId>> = Vec::new();
        let mut current: Vec<&IndexEntry> = Vec::new();
        for entry in sorted {
            let fits_chain = current
                .last()
                .is_none_or(|prev| entry.sequence_number == prev.sequence_number + 1 && entry.previous_snapshot_id.as_ref() == Some(&prev.id));
            if matches(entry) && fits_chain {
                current.push(entry);
            } else {
                flush_group(&mut current, &mut groups, criteria);
                if matches(entry) {
                    current.push(entry);
                }
            }
        }
        flush_group(&mut current, &mut groups, criteria);
        groups
    }

    /// Aggregate on-disk size statistics over `all` (§4.5 `storage_stats`).
    #[must_use]
    pub fn storage_stats(&self, all: &[IndexEntry]) -> StorageStats {
        let mut stats = StorageStats {
            total_count: all.len(),
            ..Default::default()
        };
        for entry in all {
            let Ok(Some(record)) = self.store.load(&entry.id) else {
                continue;
            };
            let bytes = record.common().diff.len() as u64;
            if record.is_consolidated() {
                stats.consolidated_count += 1;
                stats.consolidated_bytes += bytes;
            } else {
                stats.plain_bytes += bytes;
            }
        }
        stats
    }
}

fn flush_group(current: &mut Vec<&IndexEntry>, groups: &mut Vec<Vec<SnapshotId>>, criteria: &CandidateCriteria) {
    if current.len() >= criteria.min_snapshots.max(1) {
        let take = if criteria.max_snapshots == 0 { current.len() } else { current.len().min(criteria.max_snapshots) };
        groups.push(current[..take].iter().map(|e| e.id.clone()).collect());
    }
    current.clear();
}

/// Validate sequence continuity over a set of records, accounting for
/// consolidated ranges (§4.5 validator).
#[must_use]
pub fn validate_sequence_continuity_with_consolidation(records: &[SnapshotRecord]) -> ContinuityReport {
    let mut sorted: Vec<&SnapshotRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.common().sequence_number);

    let mut issues = Vec::new();
    let expected_max = sorted.len() as u64;
    let present: std::collections::HashSet<u64> = sorted.iter().map(|r| r.common().sequence_number).collect();
    for n in 1..=expected_max {
        if !present.contains(&n) {
            issues.push(ContinuityIssue::Gap { missing: n });
        }
    }

    for window in sorted.windows(2) {
        let (prev, next) = (window[0], window[1]);
        if next.common().sequence_number != prev.common().sequence_number + 1 {
            continue;
        }
        if next.previous_snapshot_id() != Some(prev.id()) {
            issues.push(ContinuityIssue::MispointedParent { id: next.id().clone() });
        }
    }

    ContinuityReport {
        valid: issues.is_empty(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiffExternalizationFormat;
    use crate::model::types::{Snapshot, SnapshotContext, SnapshotMetadata};
    use std::path::PathBuf;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn plain(id: &str, seq: u64, prev: Option<&str>, diff: &str, timestamp: DateTime<Utc>) -> SnapshotRecord {
        SnapshotRecord::Plain(Snapshot {
            common: SnapshotCommon {
                id: SnapshotId::new(id).unwrap(),
                timestamp,
                sequence_number: seq,
                previous_snapshot_id: prev.map(|p| SnapshotId::new(p).unwrap()),
                tool: "ApplyWholeFileEdit".to_owned(),
                description: format!("step {seq}"),
                affected_files: vec![PathBuf::from("a.txt")],
                diff: diff.to_owned(),
                reverse_diff: None,
                base_file_hashes: FileHashMap::new(),
                result_file_hashes: FileHashMap::new(),
                context: SnapshotContext {
                    session_id: "s1".to_owned(),
                    workspace_path: "/ws".into(),
                    tool_params: None,
                },
                metadata: SnapshotMetadata {
                    files_size_bytes: 10,
                    lines_changed: 1,
                    execution_time_ms: 1,
                },
                diff_path: None,
                reverse_diff_path: None,
            },
            extra: serde_json::Map::new(),
        })
    }

    fn build_chain(store: &CoreStore, n: usize) -> Vec<SnapshotId> {
        let mut ids = Vec::new();
        let mut prev: Option<String> = None;
        for i in 1..=n {
            let id = format!("id{i:04}aa").chars().take(6).collect::<String>();
            let diff = format!("--- a/f{i}\n+++ b/f{i}\n@@ -{i},1 +{i},1 @@\n-a\n+b\n");
            let record = plain(&id, i as u64, prev.as_deref(), &diff, ts("2026-01-01T00:00:00Z"));
            store.save(record).unwrap();
            ids.push(SnapshotId::new(&id).unwrap());
            prev = Some(id);
        }
        ids
    }

    #[test]
    fn consolidate_middle_range_renumbers_successors() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let ids = build_chain(&store, 5);

        let manager = ConsolidationManager::new(&store);
        let range = vec![ids[1].clone(), ids[2].clone(), ids[3].clone()];
        let result = manager.consolidate(&range, "merge steps 2-4", true, ts("2026-01-02T00:00:00Z"), || "cons01".to_owned()).unwrap();

        let sequences: Vec<u64> = store.index().iter().map(|e| e.sequence_number).collect();
        let mut sorted = sequences.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3]);

        let consolidated = store.load(&result.consolidated_id).unwrap().unwrap();
        assert_eq!(consolidated.sequence_number(), 2);
        match consolidated {
            SnapshotRecord::Consolidated(c) => {
                assert_eq!(c.sequence_range, (2, 4));
                assert_eq!(c.consolidated_from.len(), 3);
            }
            SnapshotRecord::Plain(_) => panic!("expected consolidated"),
        }

        let successor_id = ids[4].clone();
        let successor = store.load(&successor_id).unwrap().unwrap();
        assert_eq!(successor.sequence_number(), 3);
        assert_eq!(successor.previous_snapshot_id(), Some(&result.consolidated_id));
    }

    #[test]
    fn consolidate_length_one_range_leaves_sequence_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let ids = build_chain(&store, 3);

        let manager = ConsolidationManager::new(&store);
        let result = manager.consolidate(&[ids[1].clone()], "merge nothing", true, ts("2026-01-02T00:00:00Z"), || "cons02".to_owned()).unwrap();

        let mut sequences: Vec<u64> = store.index().iter().map(|e| e.sequence_number).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![1, 2, 3]);
        let consolidated = store.load(&result.consolidated_id).unwrap().unwrap();
        assert_eq!(consolidated.sequence_number(), 2);
    }

    #[test]
    fn consolidate_suffix_does_not_trigger_renumbering() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let ids = build_chain(&store, 3);

        let manager = ConsolidationManager::new(&store);
        let range = vec![ids[1].clone(), ids[2].clone()];
        let result = manager.consolidate(&range, "merge last two", true, ts("2026-01-02T00:00:00Z"), || "cons03".to_owned()).unwrap();
        assert_eq!(result.renumbered_count, 0);

        let mut sequences: Vec<u64> = store.index().iter().map(|e| e.sequence_number).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn consolidate_rejects_non_contiguous_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        let ids = build_chain(&store, 3);

        let manager = ConsolidationManager::new(&store);
        let range = vec![ids[0].clone(), ids[2].clone()];
        let err = manager.consolidate(&range, "not contiguous", true, ts("2026-01-02T00:00:00Z"), || "cons04".to_owned()).unwrap_err();
        assert!(matches!(err, ConsolidationError::InvalidRange { .. }));
    }

    #[test]
    fn validator_reports_sequence_gap() {
        let records = vec![plain("aaaaaa", 1, None, "d1", ts("2026-01-01T00:00:00Z")), plain("cccccc", 3, Some("bbbbbb"), "d3", ts("2026-01-01T00:00:00Z"))];
        let report = validate_sequence_continuity_with_consolidation(&records);
        assert!(!report.valid);
        assert!(report.issues.contains(&ContinuityIssue::Gap { missing: 2 }));
    }

    #[test]
    fn candidates_clamps_to_max_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoreStore::new(dir.path(), DiffExternalizationFormat::Markdown, false);
        store.init().unwrap();
        build_chain(&store, 5);
        let manager = ConsolidationManager::new(&store);
        let criteria = CandidateCriteria {
            min_snapshots: 2,
            max_snapshots: 3,
            ..Default::default()
        };
        let groups = manager.candidates(&store.index(), &criteria);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }
}
