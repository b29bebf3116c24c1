//! Core data model for the snapshot history (§3, §6).
//!
//! Validated identifier newtypes, the on-disk snapshot record shapes, and
//! the checkpoint/index metadata types. All of these are pure data: no I/O,
//! no clock or entropy access — those are injected elsewhere
//! ([`crate::clock`], [`crate::id`]) and only the values they produce land
//! here.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// SnapshotId
// ---------------------------------------------------------------------------

/// A validated 6-character lowercase `[a-z0-9]` snapshot identifier (§6
/// "Identifier format").
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Create a new `SnapshotId` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 6 lowercase `[a-z0-9]`
    /// characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.len() != 6 {
            return Err(ValidationError {
                kind: ErrorKind::SnapshotId,
                value: s.to_owned(),
                reason: format!("expected 6 characters, got {}", s.len()),
            });
        }
        if !s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(ValidationError {
                kind: ErrorKind::SnapshotId,
                value: s.to_owned(),
                reason: "must contain only lowercase letters and digits (a-z, 0-9)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// FileHash
// ---------------------------------------------------------------------------

/// A file content fingerprint: an 8-hex-char SHA-256 prefix, or empty to
/// mean "the file did not exist / could not be read" (§4.4, §7).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// The "absent" sentinel — not a real hash, meaning no file was there.
    #[must_use]
    pub fn absent() -> Self {
        Self(String::new())
    }

    /// Whether this hash represents an absent file.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the inner string (empty for [`Self::absent`]).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.is_empty() {
            return Ok(());
        }
        if s.len() != 8 || !s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(ValidationError {
                kind: ErrorKind::FileHash,
                value: s.to_owned(),
                reason: "must be empty or 8 lowercase hex characters".to_owned(),
            });
        }
        Ok(())
    }
}

impl From<String> for FileHash {
    fn from(s: String) -> Self {
        // Hashes produced by `crate::hash` are always well-formed; this
        // impl exists for ergonomic construction from computed hashes.
        debug_assert!(Self::validate(&s).is_ok(), "malformed file hash: {s:?}");
        Self(s)
    }
}

impl TryFrom<String> for FileHash {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<FileHash> for String {
    fn from(h: FileHash) -> Self {
        h.0
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A workspace-relative path to content-hash map, keyed deterministically so
/// two managers comparing the same workspace state produce the same
/// iteration order (§4.4 `detect_unknown`, §8 "Hash continuity").
pub type FileHashMap = BTreeMap<PathBuf, FileHash>;

// ---------------------------------------------------------------------------
// Snapshot context and metadata
// ---------------------------------------------------------------------------

/// Caller-supplied context describing why a snapshot was taken (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotContext {
    /// Identifier of the editing session that produced this snapshot.
    pub session_id: String,
    /// Absolute path to the workspace root at the time of the snapshot.
    pub workspace_path: PathBuf,
    /// Free-form parameters of the tool call that triggered the snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_params: Option<Value>,
}

/// Derived metadata about a single snapshot's diff (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Total size in bytes of the files touched by this snapshot's diff.
    pub files_size_bytes: u64,
    /// Number of added + removed lines across the diff.
    pub lines_changed: u64,
    /// Wall-clock time spent producing the snapshot, in milliseconds.
    pub execution_time_ms: u64,
}

// ---------------------------------------------------------------------------
// SnapshotCommon — fields shared by plain and consolidated records
// ---------------------------------------------------------------------------

/// Fields every stored record carries, whether it is a plain snapshot or the
/// result of consolidating a range of them (§3).
///
/// Flattened into both [`Snapshot`] and [`ConsolidatedSnapshot`] so the two
/// variants never duplicate field definitions, and so [`SnapshotRecord`]'s
/// accessors can return a single `&SnapshotCommon` view regardless of
/// variant (§9 "Dynamic tagged objects").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCommon {
    /// This record's identifier.
    pub id: SnapshotId,
    /// When this record was created.
    pub timestamp: DateTime<Utc>,
    /// Position in the workspace's append-only sequence, starting at 1.
    /// Dense — invariant 1 requires `{1..N}` with no gaps.
    pub sequence_number: u64,
    /// The previous record in the chain, or `None` for the first snapshot.
    pub previous_snapshot_id: Option<SnapshotId>,
    /// Free-form tag naming the operation that produced this record.
    pub tool: String,
    /// Human-readable description of the edit's goal.
    pub description: String,
    /// Workspace-relative paths actually covered by this record, after
    /// ignore filtering, in the order the operation declared them.
    pub affected_files: Vec<PathBuf>,
    /// The unified diff text describing the transition base→result.
    pub diff: String,
    /// The inverse unified diff. Absent means this record cannot be
    /// reversed via [`crate::engine::SnapshotEngine::reverse_op`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_diff: Option<String>,
    /// Per-affected-file fingerprints of the workspace before this record.
    pub base_file_hashes: FileHashMap,
    /// Per-affected-file fingerprints of the workspace after this record.
    pub result_file_hashes: FileHashMap,
    /// Caller-supplied context.
    pub context: SnapshotContext,
    /// Derived metadata.
    pub metadata: SnapshotMetadata,
    /// When the diff text has been externalized to a file under the
    /// snapshot store (§4.3, §6), the path to it relative to the store's
    /// per-day directory. `diff` then holds the `[Stored in <path>]`
    /// sentinel rather than the raw text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_path: Option<PathBuf>,
    /// The externalized path for `reverse_diff`, mirroring `diff_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_diff_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A single recorded edit operation (§3).
///
/// Immutable once written: every field is set at construction time and
/// never mutated in place — a change is always expressed as a new snapshot
/// or, for consolidation, a replacement [`ConsolidatedSnapshot`] record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Fields shared with [`ConsolidatedSnapshot`].
    #[serde(flatten)]
    pub common: SnapshotCommon,
    /// Fields written by a newer engine version that this one does not
    /// recognize. Preserved round-trip rather than dropped on re-save (§6
    /// "Unknown fields on read MUST be preserved round-trip").
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

/// Metadata recorded when several snapshots are merged into one (§4.5).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationMetadata {
    /// Number of original snapshots folded into this one.
    pub original_count: u64,
    /// Sum of `lines_changed` across the folded snapshots.
    pub total_lines_changed: u64,
    /// When the consolidation ran.
    pub consolidation_timestamp: DateTime<Utc>,
    /// Approximate bytes freed by removing the folded snapshots' diffs.
    pub space_freed: u64,
}

/// A snapshot produced by folding a contiguous range of plain snapshots into
/// one merged diff (§4.5).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedSnapshot {
    /// Fields shared with [`Snapshot`]. `sequence_number` equals
    /// `sequence_range.0`; `previous_snapshot_id` equals the replaced
    /// range's first original's parent.
    #[serde(flatten)]
    pub common: SnapshotCommon,
    /// The inclusive `[start, end]` range of sequence numbers this record
    /// replaces.
    pub sequence_range: (u64, u64),
    /// Ids of the original snapshots this record replaces, in order.
    pub consolidated_from: Vec<SnapshotId>,
    /// Consolidation-specific bookkeeping.
    pub consolidation_metadata: ConsolidationMetadata,
    /// Fields written by a newer engine version that this one does not
    /// recognize. Preserved round-trip rather than dropped on re-save.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A stored snapshot record: either a plain snapshot or the result of
/// consolidating a range of them (§4.5, §9 "Dynamic tagged objects").
///
/// `Consolidated` is tried first: `#[serde(untagged)]` tries variants in
/// declaration order, and only `Consolidated` requires `sequence_range` /
/// `consolidated_from` / `consolidation_metadata`, so a plain snapshot's
/// JSON always fails that variant (missing required fields) and falls
/// through to `Plain` — never the reverse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotRecord {
    /// A consolidated (merged) record.
    Consolidated(ConsolidatedSnapshot),
    /// An ordinary, unmerged snapshot.
    Plain(Snapshot),
}

impl SnapshotRecord {
    /// The fields shared by both variants.
    #[must_use]
    pub fn common(&self) -> &SnapshotCommon {
        match self {
            Self::Consolidated(c) => &c.common,
            Self::Plain(s) => &s.common,
        }
    }

    /// Mutable access to the fields shared by both variants, used by the
    /// store to fill in `diff_path`/`reverse_diff_path` after externalizing
    /// diff text.
    pub fn common_mut(&mut self) -> &mut SnapshotCommon {
        match self {
            Self::Consolidated(c) => &mut c.common,
            Self::Plain(s) => &mut s.common,
        }
    }

    /// The record's identifier, regardless of variant.
    #[must_use]
    pub fn id(&self) -> &SnapshotId {
        &self.common().id
    }

    /// The record's sequence number, regardless of variant.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.common().sequence_number
    }

    /// The record's parent id, regardless of variant.
    #[must_use]
    pub fn previous_snapshot_id(&self) -> Option<&SnapshotId> {
        self.common().previous_snapshot_id.as_ref()
    }

    /// The record's timestamp, regardless of variant.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.common().timestamp
    }

    /// Whether this record is the result of a consolidation.
    #[must_use]
    pub fn is_consolidated(&self) -> bool {
        matches!(self, Self::Consolidated(_))
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// One entry in the workspace's `index.json` lookup table (§4.3, §6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The snapshot this entry describes.
    pub id: SnapshotId,
    /// When it was created.
    pub timestamp: DateTime<Utc>,
    /// Free-form tag naming the producing operation.
    pub tool: String,
    /// Workspace-relative paths covered by the snapshot.
    pub affected_files: Vec<PathBuf>,
    /// Its position in the append-only sequence.
    pub sequence_number: u64,
    /// The parent snapshot, or `None` for the first in the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_snapshot_id: Option<SnapshotId>,
    /// Whether this entry is a consolidation result. Not part of `spec.md`'s
    /// literal `IndexEntry` shape, but needed so callers can tell plain and
    /// consolidated records apart without loading the full record; defaults
    /// to `false` on read so older index files deserialize unchanged.
    #[serde(default)]
    pub consolidated: bool,
}

/// The on-disk shape of `index.json` (§4.3, §6): `{ "snapshots": [...] }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    /// All known entries, in the order last persisted.
    pub snapshots: Vec<IndexEntry>,
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// A hash snapshot of the whole non-ignored workspace tree, used only for
/// drift detection (§3 "Checkpoint").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    /// This checkpoint's identifier.
    pub id: String,
    /// When the checkpoint was captured.
    pub timestamp: DateTime<Utc>,
    /// The snapshot this checkpoint anchors, or `"initial"` for the
    /// bootstrap checkpoint taken before any snapshot exists.
    pub snapshot_id: String,
    /// Relative path (from the workspace root) to content hash, covering
    /// every non-ignored file at capture time.
    pub file_hashes: FileHashMap,
    /// Verbatim file content, captured only when `save_latest_files` is on
    /// (§4.4, §9 "Optional content capture").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_contents: Option<BTreeMap<PathBuf, String>>,
    /// Derived metadata.
    pub metadata: CheckpointMetadata,
}

/// Metadata stamped alongside a [`CheckpointData`] baseline (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Number of files covered by the checkpoint.
    pub total_files: usize,
    /// Wall-clock time spent building the checkpoint, in milliseconds.
    pub creation_time_ms: u64,
}

/// One entry in `checkpoint-metadata.json`'s `checkpoints` list (§6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointIndexEntry {
    /// The checkpoint's identifier.
    pub id: String,
    /// When it was captured.
    pub timestamp: DateTime<Utc>,
}

/// The on-disk shape of `checkpoint-metadata.json` (§4.4, §6).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadataFile {
    /// All known checkpoints, oldest first.
    pub checkpoints: Vec<CheckpointIndexEntry>,
    /// The id of the most recently created checkpoint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_checkpoint_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// The kind of value that failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A [`SnapshotId`] validation error.
    SnapshotId,
    /// A [`FileHash`] validation error.
    FileHash,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnapshotId => write!(f, "SnapshotId"),
            Self::FileHash => write!(f, "FileHash"),
        }
    }
}

/// A validation error for core data model types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?} — {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_timestamp() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn sample_common(id: &str, sequence_number: u64) -> SnapshotCommon {
        SnapshotCommon {
            id: SnapshotId::new(id).unwrap(),
            timestamp: sample_timestamp(),
            sequence_number,
            previous_snapshot_id: None,
            tool: "ApplyWholeFileEdit".to_owned(),
            description: "create a".to_owned(),
            affected_files: vec![PathBuf::from("a.txt")],
            diff: "diff --git a/a.txt b/a.txt\n".to_owned(),
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
                lines_changed: 2,
                execution_time_ms: 5,
            },
            diff_path: None,
            reverse_diff_path: None,
        }
    }

    #[test]
    fn snapshot_id_rejects_wrong_length() {
        let err = SnapshotId::new("abc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SnapshotId);
    }

    #[test]
    fn snapshot_id_rejects_uppercase() {
        assert!(SnapshotId::new("ABC123").is_err());
    }

    #[test]
    fn snapshot_id_accepts_valid() {
        assert!(SnapshotId::new("a1b2c3").is_ok());
    }

    #[test]
    fn file_hash_absent_round_trips_through_json() {
        let h = FileHash::absent();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"\"");
        let back: FileHash = serde_json::from_str(&json).unwrap();
        assert!(back.is_absent());
    }

    #[test]
    fn file_hash_rejects_wrong_length() {
        assert!(FileHash::try_from("abcd".to_owned()).is_err());
    }

    #[test]
    fn snapshot_record_plain_round_trips() {
        let snap = Snapshot {
            common: sample_common("aaaaaa", 1),
            extra: serde_json::Map::new(),
        };
        let json = serde_json::to_string(&snap).unwrap();
        let record: SnapshotRecord = serde_json::from_str(&json).unwrap();
        assert!(!record.is_consolidated());
        assert_eq!(record.sequence_number(), 1);
        assert_eq!(record.id().as_str(), "aaaaaa");
    }

    #[test]
    fn snapshot_record_untagged_prefers_consolidated_shape() {
        let consolidated = ConsolidatedSnapshot {
            common: sample_common("aaaaaa", 2),
            sequence_range: (2, 4),
            consolidated_from: vec![SnapshotId::new("bbbbbb").unwrap(), SnapshotId::new("cccccc").unwrap()],
            consolidation_metadata: ConsolidationMetadata {
                original_count: 3,
                total_lines_changed: 4,
                consolidation_timestamp: sample_timestamp(),
                space_freed: 128,
            },
            extra: serde_json::Map::new(),
        };
        let json = serde_json::to_string(&consolidated).unwrap();
        let record: SnapshotRecord = serde_json::from_str(&json).unwrap();
        assert!(record.is_consolidated());
        assert_eq!(record.id().as_str(), "aaaaaa");
        match &record {
            SnapshotRecord::Consolidated(c) => assert_eq!(c.sequence_range, (2, 4)),
            SnapshotRecord::Plain(_) => panic!("expected Consolidated variant"),
        }
    }

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let snap = Snapshot {
            common: sample_common("aaaaaa", 1),
            extra: serde_json::Map::new(),
        };
        let mut value = serde_json::to_value(&snap).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("future_field".to_owned(), serde_json::json!("from a newer engine"));
        let record: SnapshotRecord = serde_json::from_value(value).unwrap();
        let SnapshotRecord::Plain(roundtripped) = &record else {
            panic!("expected Plain variant");
        };
        assert_eq!(
            roundtripped.extra.get("future_field").and_then(|v| v.as_str()),
            Some("from a newer engine")
        );
        let back = serde_json::to_value(roundtripped).unwrap();
        assert_eq!(back.get("future_field").and_then(|v| v.as_str()), Some("from a newer engine"));
    }

    #[test]
    fn index_file_round_trips() {
        let file = IndexFile {
            snapshots: vec![IndexEntry {
                id: SnapshotId::new("aaaaaa").unwrap(),
                timestamp: sample_timestamp(),
                tool: "ApplyWholeFileEdit".to_owned(),
                affected_files: vec![PathBuf::from("a.txt")],
                sequence_number: 1,
                previous_snapshot_id: None,
                consolidated: false,
            }],
        };
        let json = serde_json::to_string(&file).unwrap();
        let back: IndexFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file);
    }
}
