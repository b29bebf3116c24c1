//! The editing runtime boundary (§1 "out of scope", §6 "Runtime collaborator
//! interface").
//!
//! The engine never mutates workspace files itself — an external editing
//! runtime (write, delete, apply-diff, apply-block, apply-range tools) does
//! that, and hands the engine a unified diff to record. The only direction
//! the engine calls *into* the runtime is [`reverse_op`](crate::engine::SnapshotEngine::reverse_op),
//! which needs the runtime to actually apply a reverse diff back onto disk.
//! Modeled as a trait, the way `maw`'s [`crate::backend::WorkspaceBackend`]
//! is the interface between its CLI layer and pluggable isolation backends —
//! the engine is generic over `&dyn EditingRuntime` rather than owning a
//! concrete implementation.

use std::fmt;
use std::path::{Path, PathBuf};

/// Arguments to [`EditingRuntime::apply_unified_diff`].
#[derive(Clone, Debug)]
pub struct ApplyOptions {
    /// Directory the diff's paths are resolved relative to.
    pub base_dir: PathBuf,
    /// When `true`, report what would change without writing anything.
    pub dry_run: bool,
}

/// Result of [`EditingRuntime::apply_unified_diff`] (§6).
#[derive(Clone, Debug, Default)]
pub struct ApplyOutcome {
    /// Whether the apply succeeded.
    pub ok: bool,
    /// Human-readable detail, present on both success and failure.
    pub message: Option<String>,
    /// Number of hunks actually applied.
    pub changes_applied: u64,
    /// Workspace-relative paths the apply touched.
    pub affected_files: Vec<PathBuf>,
    /// The diff that was (or would have been) applied, echoed back for
    /// callers that want to log or display it.
    pub diff: Option<String>,
}

/// Failure applying a diff through the runtime. Deliberately thin — the
/// engine treats every runtime failure the same way (surface it, write
/// nothing) regardless of cause.
#[derive(Debug)]
pub struct RuntimeError {
    /// Human-readable explanation from the runtime.
    pub message: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "editing runtime failed to apply diff: {}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// The external collaborator that actually mutates workspace files.
///
/// Out of scope for this crate (§1): production implementations live in the
/// agent's tool layer. The engine is generic over this trait only at the
/// single call site that needs it, [`reverse_op`](crate::engine::SnapshotEngine::reverse_op).
pub trait EditingRuntime {
    /// Apply `diff_text` (a unified diff) to files under `options.base_dir`.
    ///
    /// # Errors
    /// Returns [`RuntimeError`] if the diff cannot be applied — a hunk's
    /// context does not match the file on disk, a target path escapes
    /// `base_dir`, or the underlying I/O fails.
    fn apply_unified_diff(&self, diff_text: &str, options: &ApplyOptions) -> Result<ApplyOutcome, RuntimeError>;
}

/// Workspace-relative path under `base_dir`, rejecting any diff target that
/// would escape it (`..` components or an absolute path). Shared by runtime
/// implementations so they don't each reinvent this guard.
///
/// # Errors
/// Returns a message suitable for [`RuntimeError::message`] if `path`
/// escapes `base_dir`.
pub fn resolve_within(base_dir: &Path, path: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(path);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(format!("diff target {path:?} escapes the workspace root"));
    }
    Ok(base_dir.join(candidate))
}
