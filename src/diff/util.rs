//! Small diff utilities used by the engine and checkpoint manager (§4.1
//! "Utilities").

use super::parse::parse_detailed;
use super::types::{DiffError, FileDiff};
use crate::hash::git_blob_sha1;

/// Extract the effective path (new path, or old path for a pure deletion)
/// of the first file diff found in `text`.
///
/// # Errors
/// Propagates [`DiffError`] from parsing `text`.
pub fn extract_file_path(text: &str) -> Result<Option<String>, DiffError> {
    let files = parse_detailed(text)?;
    Ok(files.first().map(|f| f.effective_path().to_owned()))
}

/// Whether `file` represents a new file being created (`/dev/null` on the
/// old side).
#[must_use]
pub fn is_file_creation(file: &FileDiff) -> bool {
    file.is_creation
}

/// Whether `file` represents a file being removed (`/dev/null` on the new
/// side).
#[must_use]
pub fn is_file_deletion(file: &FileDiff) -> bool {
    file.is_deletion
}

/// Count added and removed lines across every hunk of every file diff in
/// `text`. Context lines are not counted.
///
/// # Errors
/// Propagates [`DiffError`] from parsing `text`.
pub fn count_changes(text: &str) -> Result<(u64, u64), DiffError> {
    let files = parse_detailed(text)?;
    let mut added = 0u64;
    let mut removed = 0u64;
    for file in &files {
        for hunk in &file.hunks {
            for line in &hunk.lines {
                match line.chars().next() {
                    Some('+') => added += 1,
                    Some('-') => removed += 1,
                    _ => {}
                }
            }
        }
    }
    Ok((added, removed))
}

/// Append a trailing newline to `text` if it doesn't already end with one.
/// A no-op on empty input.
#[must_use]
pub fn ensure_trailing_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_owned()
    } else {
        format!("{text}\n")
    }
}

/// Insert an `index <old7>..<new7> 100644` line immediately after each
/// file's `diff --git` header (or, if absent, immediately before its `---`
/// line), computed from the given old/new file contents.
///
/// `contents` maps each file's effective path to its `(old, new)` content;
/// files not present in the map are left untouched.
///
/// # Errors
/// Propagates [`DiffError`] from parsing `text`.
pub fn add_file_hashes_to_diff(
    text: &str,
    contents: &std::collections::HashMap<String, (Vec<u8>, Vec<u8>)>,
) -> Result<String, DiffError> {
    let files = parse_detailed(text)?;
    let mut out = String::new();
    for file in &files {
        let path = file.effective_path();
        let hash_line = contents.get(path).map(|(old, new)| {
            let old_hash = if file.is_creation { "0000000".to_owned() } else { git_blob_sha1(old) };
            let new_hash = if file.is_deletion { "0000000".to_owned() } else { git_blob_sha1(new) };
            format!("index {old_hash}..{new_hash} 100644\n")
        });

        if let Some(git_header) = &file.git_header {
            out.push_str(git_header);
            out.push('\n');
        }
        if let Some(line) = hash_line {
            out.push_str(&line);
        } else if let Some(index_line) = &file.index_line {
            out.push_str(index_line);
            out.push('\n');
        }

        let old_label = if file.is_creation { "/dev/null".to_owned() } else { format!("a/{}", file.old_path) };
        let new_label = if file.is_deletion { "/dev/null".to_owned() } else { format!("b/{}", file.new_path) };
        out.push_str(&format!("--- {old_label}\n+++ {new_label}\n"));
        for hunk in &file.hunks {
            out.push_str(&hunk.header());
            out.push('\n');
            for line in &hunk.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    Ok(out)
}

/// Strip any Git-style timestamp suffix (a tab followed by a date) from
/// `---`/`+++` lines, leaving only the path. Used to normalize diff text
/// before comparing it for the `reverse(reverse(d)) = d` property, since
/// timestamps are not expected to round-trip.
#[must_use]
pub fn clean_timestamps(text: &str) -> String {
    text.lines()
        .map(|line| {
            if (line.starts_with("--- ") || line.starts_with("+++ ")) && line.contains('\t') {
                line.split('\t').next().unwrap_or(line)
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + if text.ends_with('\n') { "\n" } else { "" }
}
