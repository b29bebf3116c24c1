//! Crate-level error aggregation (§7).
//!
//! Each component module defines its own narrow error enum; `EngineError` is
//! what every public [`crate::engine::SnapshotEngine`] method actually
//! returns, aggregating those the way `maw`'s `ManifoldError` aggregates
//! `ConfigError` and `ValidationError`. `Display` messages favor actionable
//! guidance over restating the failure, matching `oplog/write.rs`'s style.

use std::fmt;
use std::path::PathBuf;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::consolidation::ConsolidationError;
use crate::diff::DiffError;
use crate::ignore::IgnoreError;
use crate::model::types::ValidationError;
use crate::runtime::RuntimeError;
use crate::store::StoreError;

/// The aggregated error type returned by every public engine operation
/// (§7's taxonomy, mapped to concrete Rust variants).
#[derive(Debug)]
pub enum EngineError {
    /// Malformed caller input: empty `affected_files`, both `ids` and
    /// `sequence_range` given to `consolidate_snapshots`, an invalid
    /// sequence range, an unknown snapshot id, or a diff that would
    /// produce no change.
    InvalidInput {
        /// What was wrong and what the caller should pass instead.
        message: String,
    },
    /// Every file named in `affected_files` matched an ignore pattern.
    AllFilesIgnored {
        /// The paths that were all ignored.
        files: Vec<PathBuf>,
    },
    /// A diff failed to parse, validate, reverse, or merge.
    Diff(DiffError),
    /// Unknown-change detection found drift and the configured strategy is
    /// `error`.
    UnknownDrift {
        /// The drifting paths.
        files: Vec<PathBuf>,
    },
    /// A filesystem operation failed.
    Io(std::io::Error),
    /// A loaded or about-to-be-persisted `config.toml` was malformed.
    Config(ConfigError),
    /// `validate_invariants` (or an internal post-check) found a broken
    /// invariant: a sequence gap, a dangling parent pointer, a hash
    /// discontinuity, or a cache/disk mismatch.
    Integrity {
        /// Human-readable description of each violation found.
        issues: Vec<String>,
    },
    /// The editing runtime failed to apply a diff handed to it by
    /// `reverse_op`.
    Runtime(RuntimeError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { message } => {
                write!(f, "invalid input: {message}")
            }
            Self::AllFilesIgnored { files } => {
                write!(
                    f,
                    "every declared file matched an ignore pattern: {}\n  To fix: check .snapshotignore and the \
                     configured exclusions, or pass files that are not ignored.",
                    files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
                )
            }
            Self::Diff(e) => write!(f, "diff error: {e}"),
            Self::UnknownDrift { files } => write!(
                f,
                "workspace drifted outside the engine for {} file(s): {}\n  To fix: call create_snapshot with \
                 unknown-change strategy 'warn' or 'auto-fix' to absorb the drift, or review the changes and \
                 create a checkpoint manually before retrying.",
                files.len(),
                files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
            ),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::Integrity { issues } => {
                write!(f, "integrity check failed ({} issue(s)):\n  - {}", issues.len(), issues.join("\n  - "))
            }
            Self::Runtime(e) => write!(f, "{e}\n  To fix: inspect the reverse diff and the runtime's report, then retry or pass force=true."),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Diff(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Runtime(e) => Some(e),
            Self::InvalidInput { .. } | Self::AllFilesIgnored { .. } | Self::UnknownDrift { .. } | Self::Integrity { .. } => {
                None
            }
        }
    }
}

impl From<RuntimeError> for EngineError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DiffError> for EngineError {
    fn from(e: DiffError) -> Self {
        Self::Diff(e)
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidInput { message: e.to_string() }
    }
}

impl From<IgnoreError> for EngineError {
    fn from(e: IgnoreError) -> Self {
        match e {
            IgnoreError::Io(io) => Self::Io(io),
            IgnoreError::InvalidPattern { .. } => Self::InvalidInput { message: e.to_string() },
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io(io) => Self::Io(io),
            StoreError::Corrupt { path, reason } => {
                Self::Integrity { issues: vec![format!("corrupt snapshot data at {}: {reason}", path.display())] }
            }
        }
    }
}

impl From<CheckpointError> for EngineError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::Io(io) => Self::Io(io),
            CheckpointError::Corrupt { path, reason } => {
                Self::Integrity { issues: vec![format!("corrupt checkpoint data at {}: {reason}", path.display())] }
            }
        }
    }
}

impl From<ConsolidationError> for EngineError {
    fn from(e: ConsolidationError) -> Self {
        match e {
            ConsolidationError::InvalidRange { reason } => Self::InvalidInput { message: reason },
            ConsolidationError::UnresolvedConflicts { conflicts } => {
                Self::InvalidInput { message: format!("unresolved diff conflicts: {}", conflicts.join("; ")) }
            }
            ConsolidationError::Diff(d) => Self::Diff(d),
            ConsolidationError::Store(s) => s.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_files_ignored_message_lists_paths() {
        let err = EngineError::AllFilesIgnored {
            files: vec![PathBuf::from("debug.log")],
        };
        assert!(err.to_string().contains("debug.log"));
        assert!(err.to_string().contains("To fix"));
    }

    #[test]
    fn unknown_drift_message_lists_count_and_files() {
        let err = EngineError::UnknownDrift {
            files: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 file(s)"));
        assert!(msg.contains("a.txt"));
        assert!(msg.contains("b.txt"));
    }

    #[test]
    fn integrity_message_lists_every_issue() {
        let err = EngineError::Integrity {
            issues: vec!["sequence gap at 3".to_owned(), "dangling parent abc123".to_owned()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 issue(s)"));
        assert!(msg.contains("sequence gap at 3"));
        assert!(msg.contains("dangling parent abc123"));
    }

    #[test]
    fn io_error_has_source() {
        use std::error::Error as _;
        let err = EngineError::Io(std::io::Error::other("boom"));
        assert!(err.source().is_some());
    }

    #[test]
    fn invalid_input_has_no_source() {
        use std::error::Error as _;
        let err = EngineError::InvalidInput {
            message: "both ids and sequence_range given".to_owned(),
        };
        assert!(err.source().is_none());
    }

    #[test]
    fn from_diff_error_wraps() {
        let diff_err = DiffError::EmptyInput;
        let err: EngineError = diff_err.into();
        assert!(matches!(err, EngineError::Diff(DiffError::EmptyInput)));
    }

    #[test]
    fn from_validation_error_becomes_invalid_input() {
        let validation = ValidationError {
            kind: crate::model::types::ErrorKind::SnapshotId,
            value: "bad".to_owned(),
            reason: "too short".to_owned(),
        };
        let err: EngineError = validation.into();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }
}
