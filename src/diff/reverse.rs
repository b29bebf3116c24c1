//! Computing a diff's inverse (§4.1 `reverse`).

use std::collections::HashSet;

use super::parse::parse_detailed;
use super::types::{DiffError, FileDiff, Hunk};

/// Options controlling which files [`reverse`] covers.
#[derive(Clone, Debug, Default)]
pub struct ReverseOptions {
    /// If non-empty, only these paths (by [`FileDiff::effective_path`]) are
    /// reversed; all others are dropped from the output.
    pub include_files: Option<HashSet<String>>,
    /// Paths to drop from the output even if they would otherwise be
    /// covered by `include_files` or the default (all files).
    pub exclude_files: Option<HashSet<String>>,
}

/// Build the diff that, applied to the post-state `text` describes, would
/// restore the pre-state: swaps `---`/`+++`, swaps each hunk's old/new
/// counts, flips every `+` to `-` and `-` to `+`, and maps `/dev/null`
/// across the creation/deletion boundary so a deletion's reverse is a
/// creation and vice versa. Context and meta lines are unchanged.
///
/// # Errors
/// Propagates [`DiffError`] from parsing `text`.
pub fn reverse(text: &str, options: &ReverseOptions) -> Result<String, DiffError> {
    let files = parse_detailed(text)?;
    let mut out = String::new();
    for file in &files {
        let path = file.effective_path();
        if let Some(include) = &options.include_files {
            if !include.contains(path) {
                continue;
            }
        }
        if let Some(exclude) = &options.exclude_files {
            if exclude.contains(path) {
                continue;
            }
        }
        out.push_str(&reverse_file(file));
    }
    Ok(out)
}

fn reverse_file(file: &FileDiff) -> String {
    let new_old_path = file.new_path.clone();
    let new_new_path = file.old_path.clone();
    let is_creation = file.is_deletion;
    let is_deletion = file.is_creation;

    let old_label = if is_creation { "/dev/null".to_owned() } else { format!("a/{new_old_path}") };
    let new_label = if is_deletion { "/dev/null".to_owned() } else { format!("b/{new_new_path}") };

    let mut out = String::new();
    if let Some(git_header) = &file.git_header {
        out.push_str(git_header);
        out.push('\n');
    }
    if let Some(index_line) = &file.index_line {
        out.push_str(&reverse_index_line(index_line));
        out.push('\n');
    }
    out.push_str(&format!("--- {old_label}\n+++ {new_label}\n"));

    for hunk in &file.hunks {
        let reversed = reverse_hunk(hunk);
        out.push_str(&reversed.header());
        out.push('\n');
        for line in &reversed.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn reverse_hunk(hunk: &Hunk) -> Hunk {
    let lines = hunk
        .lines
        .iter()
        .map(|line| match line.chars().next() {
            Some('-') => format!("+{}", &line[1..]),
            Some('+') => format!("-{}", &line[1..]),
            _ => line.clone(),
        })
        .collect();
    Hunk {
        old_start: hunk.new_start,
        old_count: hunk.new_count,
        new_start: hunk.old_start,
        new_count: hunk.old_count,
        lines,
    }
}

fn reverse_index_line(line: &str) -> String {
    let Some(rest) = line.strip_prefix("index ") else {
        return line.to_owned();
    };
    let Some((hashes, mode)) = rest.rsplit_once(' ') else {
        return line.to_owned();
    };
    let Some((old_hash, new_hash)) = hashes.split_once("..") else {
        return line.to_owned();
    };
    format!("index {new_hash}..{old_hash} {mode}")
}
