//! Combining several diffs into one (§4.1 `merge`).

use std::collections::BTreeMap;

use super::parse::parse_detailed;
use super::types::{DiffError, FileDiff, Hunk};

/// How [`merge`] handles files whose hunks overlap after concatenation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Abort the whole merge and return an error.
    Fail,
    /// Emit the merged text anyway, reporting the conflicts found.
    #[default]
    Concatenate,
    /// Drop only the conflicting files from the output, reporting them as
    /// warnings rather than conflicts.
    Skip,
}

/// Options controlling [`merge`].
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// Whether to keep `diff --git`/`index` preamble lines in the output.
    pub preserve_git_headers: bool,
    /// What to do when two hunks for the same file overlap.
    pub conflict_resolution: ConflictResolution,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            preserve_git_headers: true,
            conflict_resolution: ConflictResolution::default(),
        }
    }
}

/// A detected overlap between two hunks of the same file after
/// concatenation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    /// The file path the conflict occurred in.
    pub path: String,
    /// The earlier hunk's header text.
    pub first_hunk: String,
    /// The later, overlapping hunk's header text.
    pub second_hunk: String,
}

/// Result of [`merge`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    /// Whether the merge completed without being aborted by
    /// [`ConflictResolution::Fail`].
    pub ok: bool,
    /// The merged diff text. Empty when `ok` is false.
    pub merged_text: String,
    /// Conflicts found (populated under `Concatenate`; empty under `Skip`,
    /// which reports the same information as `warnings` instead).
    pub conflicts: Vec<Conflict>,
    /// Non-fatal notices, such as files dropped under `Skip`.
    pub warnings: Vec<String>,
    /// Number of distinct file paths represented in `merged_text`.
    pub files_processed: usize,
}

/// Merge several unified diffs, grouping hunks by file path and
/// concatenating them sorted by `old_start` within each file.
///
/// Overlap is detected when, for two hunks of the same file sorted by
/// `old_start`, `current.old_start + current.old_count - 1 >=
/// next.old_start`.
///
/// # Errors
/// Propagates [`DiffError`] from parsing any of `diffs`.
pub fn merge(diffs: &[String], options: &MergeOptions) -> Result<MergeResult, DiffError> {
    if diffs.is_empty() {
        return Err(DiffError::EmptyInput);
    }

    let mut by_path: BTreeMap<String, Vec<FileDiff>> = BTreeMap::new();
    for diff_text in diffs {
        for file in parse_detailed(diff_text)? {
            by_path.entry(file.effective_path().to_owned()).or_default().push(file);
        }
    }

    let mut conflicts = Vec::new();
    let mut warnings = Vec::new();
    let mut merged_text = String::new();
    let mut files_processed = 0usize;

    for (path, file_versions) in by_path {
        let mut hunks: Vec<(Hunk, &FileDiff)> = Vec::new();
        for file in &file_versions {
            for hunk in &file.hunks {
                hunks.push((hunk.clone(), file));
            }
        }
        hunks.sort_by_key(|(h, _)| h.old_start);

        let mut path_conflicts = Vec::new();
        for window in hunks.windows(2) {
            let (current, _) = &window[0];
            let (next, _) = &window[1];
            let current_end = current.old_start + current.old_count;
            if current.old_count > 0 && current_end.saturating_sub(1) >= next.old_start {
                path_conflicts.push(Conflict {
                    path: path.clone(),
                    first_hunk: current.header(),
                    second_hunk: next.header(),
                });
            }
        }

        if !path_conflicts.is_empty() {
            match options.conflict_resolution {
                ConflictResolution::Fail => {
                    return Ok(MergeResult {
                        ok: false,
                        merged_text: String::new(),
                        conflicts: path_conflicts,
                        warnings,
                        files_processed: 0,
                    });
                }
                ConflictResolution::Skip => {
                    warnings.push(format!("dropped {path}: overlapping hunks"));
                    continue;
                }
                ConflictResolution::Concatenate => {
                    conflicts.extend(path_conflicts);
                }
            }
        }

        let representative = file_versions.last().expect("by_path groups are non-empty");
        merged_text.push_str(&render_file(representative, &hunks, options.preserve_git_headers));
        files_processed += 1;
    }

    Ok(MergeResult {
        ok: true,
        merged_text,
        conflicts,
        warnings,
        files_processed,
    })
}

fn render_file(representative: &FileDiff, hunks: &[(Hunk, &FileDiff)], preserve_git_headers: bool) -> String {
    let mut out = String::new();
    if preserve_git_headers {
        if let Some(git_header) = &representative.git_header {
            out.push_str(git_header);
            out.push('\n');
        }
        if let Some(index_line) = &representative.index_line {
            out.push_str(index_line);
            out.push('\n');
        }
    }
    let old_label = if representative.is_creation {
        "/dev/null".to_owned()
    } else {
        format!("a/{}", representative.old_path)
    };
    let new_label = if representative.is_deletion {
        "/dev/null".to_owned()
    } else {
        format!("b/{}", representative.new_path)
    };
    out.push_str(&format!("--- {old_label}\n+++ {new_label}\n"));
    for (hunk, _) in hunks {
        out.push_str(&hunk.header());
        out.push('\n');
        for line in &hunk.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
