//! Shared diff data types and error taxonomy (§4.1).

use std::fmt;

/// A single hunk of a unified diff: one `@@ -old_start,old_count
/// +new_start,new_count @@` header and the body lines that follow it.
///
/// `lines` carries the leading marker (`' '` context, `'-'` removed, `'+'`
/// added) as the first character of each entry, the way the raw diff text
/// does, so reversal and merging can operate on them without re-parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based starting line in the old file.
    pub old_start: u64,
    /// Number of lines the hunk spans in the old file.
    pub old_count: u64,
    /// 1-based starting line in the new file.
    pub new_start: u64,
    /// Number of lines the hunk spans in the new file.
    pub new_count: u64,
    /// Body lines, each prefixed with its marker character.
    pub lines: Vec<String>,
}

impl Hunk {
    /// Render the `@@ ... @@` header line for this hunk (no trailing
    /// newline).
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

/// One file's parsed unified diff: optional Git preamble, the `---`/`+++`
/// paths, and the hunks between them (§4.1 `parse_detailed`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDiff {
    /// The `diff --git a/X b/X` line, if present.
    pub git_header: Option<String>,
    /// The `index <old>..<new> <mode>` line, if present.
    pub index_line: Option<String>,
    /// Path from the `---` line, with any `a/` prefix stripped.
    pub old_path: String,
    /// Path from the `+++` line, with any `b/` prefix stripped.
    pub new_path: String,
    /// The file's hunks, in order.
    pub hunks: Vec<Hunk>,
    /// Whether the old side is `/dev/null` (the file did not exist before).
    pub is_creation: bool,
    /// Whether the new side is `/dev/null` (the file does not exist after).
    pub is_deletion: bool,
}

impl FileDiff {
    /// The path this diff is "about" — the new path for creations and
    /// modifications, the old path for deletions. Used to group hunks from
    /// several diffs that touch the same file during [`crate::diff::merge`].
    #[must_use]
    pub fn effective_path(&self) -> &str {
        if self.is_deletion {
            &self.old_path
        } else {
            &self.new_path
        }
    }
}

/// A file diff before hunk parsing: just the raw text span and the two
/// paths split out of its `---`/`+++` (or `diff --git`) framing (§4.1
/// `parse_multi_file_diff`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFileDiff {
    /// Path from the `---` line, verbatim (including any `a/` prefix).
    pub old_path: String,
    /// Path from the `+++` line, verbatim (including any `b/` prefix).
    pub new_path: String,
    /// The full text of this file's diff segment, including its framing
    /// lines and all hunks, verbatim.
    pub body: String,
}

/// Failure modes for diff parsing, validation, reversal, and merging
/// (§4.1 "Failure modes").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffError {
    /// A `---`/`+++`/`@@` header line did not match the expected shape.
    MalformedHeader {
        /// 1-based line number of the offending header, if known.
        line: Option<usize>,
        /// The offending text.
        text: String,
    },
    /// A hunk's declared line counts did not match its body.
    HunkCountMismatch {
        /// 1-based line number of the hunk header.
        line: usize,
        /// What the header declared.
        expected: (u64, u64),
        /// What the body actually contained.
        actual: (u64, u64),
    },
    /// Two hunks in the same file, after merge, cover overlapping ranges.
    OverlappingHunks {
        /// The file path the overlap occurred in.
        path: String,
        /// The two overlapping hunk headers, for diagnostics.
        first: String,
        second: String,
    },
    /// The input text was empty or contained no parseable file diffs.
    EmptyInput,
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader { line, text } => match line {
                Some(line) => write!(f, "malformed diff header at line {line}: {text:?}"),
                None => write!(f, "malformed diff header: {text:?}"),
            },
            Self::HunkCountMismatch {
                line,
                expected,
                actual,
            } => write!(
                f,
                "hunk at line {line} declares {}/{} old/new lines but body has {}/{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            Self::OverlappingHunks { path, first, second } => {
                write!(f, "overlapping hunks in {path}: {first} overlaps {second}")
            }
            Self::EmptyInput => write!(f, "diff input was empty"),
        }
    }
}

impl std::error::Error for DiffError {}
