//! Splitting and structural parsing of unified diff text (§4.1
//! `parse_multi_file_diff`, `parse_detailed`).

use super::types::{DiffError, FileDiff, Hunk, RawFileDiff};

/// Split a (possibly multi-file) diff into per-file raw segments.
///
/// Recognizes plain `--- `/`+++ ` framed diffs and Git-framed diffs (`diff
/// --git …` followed by an optional `index …` line then `---`/`+++`).
/// A concatenated multi-file diff is split at every `diff --git` line, and
/// at any `--- ` line immediately followed by a `+++ ` line that was not
/// already part of a `diff --git` segment.
///
/// # Errors
/// Returns [`DiffError::EmptyInput`] if `text` is empty or contains no
/// file-diff framing at all.
pub fn parse_multi_file_diff(text: &str) -> Result<Vec<RawFileDiff>, DiffError> {
    if text.trim().is_empty() {
        return Err(DiffError::EmptyInput);
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut boundaries = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("diff --git ") {
            boundaries.push(i);
        } else if line.starts_with("--- ") && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ ")) {
            // Only a boundary if not immediately preceded by a `diff --git`
            // segment we already recorded for this same file.
            if boundaries.last().is_none_or(|&b| !is_same_git_segment(&lines, b, i)) {
                boundaries.push(i);
            }
        }
    }

    if boundaries.is_empty() {
        return Err(DiffError::EmptyInput);
    }

    let mut segments = Vec::new();
    for (idx, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(idx + 1).copied().unwrap_or(lines.len());
        let body = lines[start..end].join("\n");
        let body = if text.ends_with('\n') && end == lines.len() {
            format!("{body}\n")
        } else {
            body
        };
        let (old_path, new_path) = extract_paths(&lines[start..end])?;
        segments.push(RawFileDiff {
            old_path,
            new_path,
            body,
        });
    }

    Ok(segments)
}

/// Whether the `---` line at `minus_idx` belongs to the `diff --git`
/// segment starting at `git_idx` (i.e. no other `diff --git`/`---` line
/// appears strictly between them).
fn is_same_git_segment(lines: &[&str], git_idx: usize, minus_idx: usize) -> bool {
    (git_idx..minus_idx).all(|i| i == git_idx || !lines[i].starts_with("diff --git "))
}

fn extract_paths(segment: &[&str]) -> Result<(String, String), DiffError> {
    let minus = segment
        .iter()
        .find(|l| l.starts_with("--- "))
        .ok_or_else(|| DiffError::MalformedHeader {
            line: None,
            text: segment.first().unwrap_or(&"").to_string(),
        })?;
    let plus = segment
        .iter()
        .find(|l| l.starts_with("+++ "))
        .ok_or_else(|| DiffError::MalformedHeader {
            line: None,
            text: minus.to_string(),
        })?;
    let old_path = minus.trim_start_matches("--- ").split('\t').next().unwrap_or("").trim().to_owned();
    let new_path = plus.trim_start_matches("+++ ").split('\t').next().unwrap_or("").trim().to_owned();
    Ok((old_path, new_path))
}

fn strip_prefix(path: &str) -> String {
    if path == "/dev/null" {
        path.to_owned()
    } else if let Some(rest) = path.strip_prefix("a/").or_else(|| path.strip_prefix("b/")) {
        rest.to_owned()
    } else {
        path.to_owned()
    }
}

/// Parse a diff's raw segments into fully structured [`FileDiff`] values,
/// with hunks broken out (§4.1 `parse_detailed`).
///
/// # Errors
/// Returns [`DiffError::MalformedHeader`] if a hunk header (`@@ ... @@`)
/// cannot be parsed, or [`DiffError::EmptyInput`] if `text` has no content.
pub fn parse_detailed(text: &str) -> Result<Vec<FileDiff>, DiffError> {
    let raw = parse_multi_file_diff(text)?;
    raw.into_iter().map(|r| parse_one(&r)).collect()
}

fn parse_one(raw: &RawFileDiff) -> Result<FileDiff, DiffError> {
    let lines: Vec<&str> = raw.body.lines().collect();
    let git_header = lines.iter().find(|l| l.starts_with("diff --git ")).map(|s| (*s).to_owned());
    let index_line = lines.iter().find(|l| l.starts_with("index ")).map(|s| (*s).to_owned());

    let old_path = strip_prefix(&raw.old_path);
    let new_path = strip_prefix(&raw.new_path);
    let is_creation = raw.old_path == "/dev/null";
    let is_deletion = raw.new_path == "/dev/null";

    let mut hunks = Vec::new();
    let mut i = 0usize;
    let start_len = lines.len();
    let mut iterations = 0usize;
    let bound = 2 * start_len.max(1);

    while i < lines.len() {
        iterations += 1;
        if iterations > bound {
            break;
        }
        if lines[i].starts_with("@@ ") {
            let header_line_no = i + 1;
            let (old_start, old_count, new_start, new_count) =
                parse_hunk_header(lines[i]).ok_or_else(|| DiffError::MalformedHeader {
                    line: Some(header_line_no),
                    text: lines[i].to_owned(),
                })?;
            i += 1;
            let mut body = Vec::new();
            while i < lines.len() && !lines[i].starts_with("@@") && !lines[i].starts_with("diff --git ") {
                body.push(lines[i].to_owned());
                i += 1;
            }
            hunks.push(Hunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines: body,
            });
        } else {
            i += 1;
        }
    }

    Ok(FileDiff {
        git_header,
        index_line,
        old_path,
        new_path,
        hunks,
        is_creation,
        is_deletion,
    })
}

/// Parse an `@@ -old_start,old_count +new_start,new_count @@` header.
/// A missing `,count` defaults the count to 1, matching diff tools'
/// convention for single-line hunks.
fn parse_hunk_header(line: &str) -> Option<(u64, u64, u64, u64)> {
    let inner = line.strip_prefix("@@ ")?;
    let end = inner.find(" @@")?;
    let inner = &inner[..end];
    let mut parts = inner.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some((old_start, old_count, new_start, new_count))
}

fn parse_range(s: &str) -> Option<(u64, u64)> {
    if let Some((start, count)) = s.split_once(',') {
        Some((start.parse().ok()?, count.parse().ok()?))
    } else {
        Some((s.parse().ok()?, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "diff --git a/x b/x\nindex abc1234..def5678 100644\n--- a/x\n+++ b/x\n@@ -1,2 +1,2 @@\n line1\n-line2\n+LINE2\n";

    #[test]
    fn parse_multi_file_diff_splits_single_git_segment() {
        let segments = parse_multi_file_diff(SAMPLE).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].old_path, "a/x");
        assert_eq!(segments[0].new_path, "b/x");
    }

    #[test]
    fn parse_multi_file_diff_rejects_empty_input() {
        assert_eq!(parse_multi_file_diff("").unwrap_err(), DiffError::EmptyInput);
    }

    #[test]
    fn parse_multi_file_diff_splits_two_files() {
        let two = format!("{SAMPLE}{SAMPLE}");
        let segments = parse_multi_file_diff(&two).unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn parse_detailed_extracts_hunk_counts() {
        let parsed = parse_detailed(SAMPLE).unwrap();
        assert_eq!(parsed.len(), 1);
        let file = &parsed[0];
        assert_eq!(file.old_path, "x");
        assert_eq!(file.new_path, "x");
        assert_eq!(file.hunks.len(), 1);
        assert_eq!(file.hunks[0].old_start, 1);
        assert_eq!(file.hunks[0].old_count, 2);
        assert!(file.index_line.is_some());
    }

    #[test]
    fn parse_detailed_flags_creation_and_deletion() {
        let created = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,1 @@\n+hello\n";
        let parsed = parse_detailed(created).unwrap();
        assert!(parsed[0].is_creation);

        let deleted = "--- a/old.txt\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-hello\n";
        let parsed = parse_detailed(deleted).unwrap();
        assert!(parsed[0].is_deletion);
    }

    #[test]
    fn parse_detailed_rejects_malformed_hunk_header() {
        let bad = "--- a/x\n+++ b/x\n@@ not a real header @@\n line\n";
        let err = parse_detailed(bad).unwrap_err();
        assert!(matches!(err, DiffError::MalformedHeader { .. }));
    }
}
