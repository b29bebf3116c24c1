//! Unified diff generation from two in-memory texts (§4.1
//! `generate_unified_diff`).

use similar::{ChangeTag, TextDiff};

use crate::hash::{git_blob_sha1, NULL_BLOB};

const CONTEXT_RADIUS: usize = 3;

/// Options controlling [`generate_unified_diff`].
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    /// Path to show on the `---`/`+++` lines for the old side. Defaults to
    /// `new_path` when absent, matching a same-file modification.
    pub old_path: Option<String>,
    /// Path to show on the `---`/`+++` lines for the new side.
    pub new_path: Option<String>,
    /// Whether to emit `diff --git`/`index` preamble lines.
    pub git_headers: bool,
    /// Explicit Git-style timestamp for the old side (e.g. `"2026-01-01
    /// 00:00:00.000000000 +0000"`). Only rendered when `git_headers` asks
    /// for headers; the diff module has no clock of its own, so this must
    /// be supplied by the caller.
    pub old_timestamp: Option<String>,
    /// Explicit Git-style timestamp for the new side.
    pub new_timestamp: Option<String>,
}

/// Build a unified diff between `old_text` and `new_text`.
///
/// Creation is signaled by an empty `old_text` combined with
/// `options.old_path` left unset (the old side becomes `/dev/null`);
/// deletion is the mirror case on the new side. Within a single hunk, all
/// removed lines are emitted before all added lines, per the wire format's
/// ordering rule — the opposite of line-by-line interleaving a naive
/// change-tag walk would produce.
#[must_use]
pub fn generate_unified_diff(old_text: &str, new_text: &str, options: &GenerateOptions) -> String {
    let is_creation = old_text.is_empty() && options.old_path.is_none();
    let is_deletion = new_text.is_empty() && options.new_path.is_none();

    let display_path = options
        .new_path
        .clone()
        .or_else(|| options.old_path.clone())
        .unwrap_or_else(|| "file".to_owned());

    let old_label = if is_creation {
        "/dev/null".to_owned()
    } else {
        format!("a/{}", options.old_path.clone().unwrap_or_else(|| display_path.clone()))
    };
    let new_label = if is_deletion {
        "/dev/null".to_owned()
    } else {
        format!("b/{}", options.new_path.clone().unwrap_or_else(|| display_path.clone()))
    };

    let mut out = String::new();

    if options.git_headers {
        out.push_str(&format!("diff --git a/{display_path} b/{display_path}\n"));
        let old_hash = if is_creation { NULL_BLOB.to_owned() } else { git_blob_sha1(old_text.as_bytes()) };
        let new_hash = if is_deletion { NULL_BLOB.to_owned() } else { git_blob_sha1(new_text.as_bytes()) };
        out.push_str(&format!("index {old_hash}..{new_hash} 100644\n"));
    }

    out.push_str("--- ");
    out.push_str(&old_label);
    if let Some(ts) = &options.old_timestamp {
        if options.git_headers {
            out.push('\t');
            out.push_str(ts);
        }
    }
    out.push('\n');

    out.push_str("+++ ");
    out.push_str(&new_label);
    if let Some(ts) = &options.new_timestamp {
        if options.git_headers {
            out.push('\t');
            out.push_str(ts);
        }
    }
    out.push('\n');

    let diff = TextDiff::from_lines(old_text, new_text);
    for group in diff.grouped_ops(CONTEXT_RADIUS) {
        if group.is_empty() {
            continue;
        }
        let old_start = group[0].old_range().start;
        let new_start = group[0].new_range().start;
        let mut old_count = 0u64;
        let mut new_count = 0u64;
        let mut body = Vec::new();

        // Dispatch on each change's own tag rather than the enclosing op's —
        // a `Replace` op (the common case for an in-place line change) has
        // no `ChangeTag` counterpart, but `iter_changes` still yields it as
        // a run of `Delete` changes followed by a run of `Insert` changes,
        // which is exactly the ordering the wire format wants.
        for op in &group {
            for change in diff.iter_changes(op) {
                match change.tag() {
                    ChangeTag::Equal => {
                        body.push(format!(" {}", strip_newline(change.value())));
                        old_count += 1;
                        new_count += 1;
                    }
                    ChangeTag::Delete => {
                        body.push(format!("-{}", strip_newline(change.value())));
                        old_count += 1;
                    }
                    ChangeTag::Insert => {
                        body.push(format!("+{}", strip_newline(change.value())));
                        new_count += 1;
                    }
                }
            }
        }

        let old_header_start = if old_count == 0 { old_start } else { old_start + 1 };
        let new_header_start = if new_count == 0 { new_start } else { new_start + 1 };
        out.push_str(&format!(
            "@@ -{old_header_start},{old_count} +{new_header_start},{new_count} @@\n"
        ));
        for line in body {
            out.push_str(&line);
            out.push('\n');
        }
    }

    out
}

fn strip_newline(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_change_produces_deletion_then_addition() {
        let diff = generate_unified_diff("line1\nline2\n", "line1\nLINE2\n", &GenerateOptions::default());
        let minus = diff.find('-').unwrap();
        let plus = diff.find('+').unwrap();
        assert!(minus < plus, "expected '-' line before '+' line:\n{diff}");
    }

    #[test]
    fn git_headers_include_index_line() {
        let opts = GenerateOptions {
            old_path: Some("x".to_owned()),
            new_path: Some("x".to_owned()),
            git_headers: true,
            ..Default::default()
        };
        let diff = generate_unified_diff("a\n", "b\n", &opts);
        assert!(diff.starts_with("diff --git a/x b/x\n"));
        assert!(diff.lines().nth(1).unwrap().starts_with("index "));
    }

    #[test]
    fn creation_uses_dev_null_old_side() {
        let diff = generate_unified_diff("", "new content\n", &GenerateOptions::default());
        assert!(diff.contains("--- /dev/null"));
    }

    #[test]
    fn deletion_uses_dev_null_new_side() {
        let opts = GenerateOptions {
            old_path: Some("gone.txt".to_owned()),
            ..Default::default()
        };
        let diff = generate_unified_diff("old content\n", "", &opts);
        assert!(diff.contains("+++ /dev/null"));
    }
}
