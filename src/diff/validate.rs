//! Structural validation of unified diff text (§4.1 `validate`).

use std::fmt;

use super::parse::parse_detailed;
use super::types::DiffError;

/// One problem found while validating a diff. Unlike [`DiffError`], several
/// of these can be reported from a single call — `validate` collects every
/// issue it finds rather than stopping at the first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationIssue {
    /// The text contains `\r\n` line endings. Unified diffs in this crate's
    /// wire format are LF-only.
    ContainsCrlf,
    /// Non-empty input did not end with a trailing newline.
    MissingTrailingNewline,
    /// A structural problem surfaced while parsing or checking hunks.
    Malformed(DiffError),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContainsCrlf => write!(f, "diff contains CRLF line endings"),
            Self::MissingTrailingNewline => write!(f, "diff is missing a trailing newline"),
            Self::Malformed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ValidationIssue {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Malformed(e) => Some(e),
            Self::ContainsCrlf | Self::MissingTrailingNewline => None,
        }
    }
}

/// The outcome of validating a diff: whether it is acceptable, and every
/// issue found along the way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    /// `true` when `errors` is empty.
    pub valid: bool,
    /// Every issue found, in the order detected.
    pub errors: Vec<ValidationIssue>,
}

/// Validate that `text` is well-formed unified diff text: LF-only line
/// endings, a trailing newline (when non-empty), and hunk headers whose
/// declared line counts match their bodies.
///
/// Collects every issue found rather than stopping at the first — the
/// caller decides whether any particular combination is acceptable.
///
/// # Errors
/// Returns [`DiffError::EmptyInput`] or [`DiffError::MalformedHeader`] when
/// `text` cannot be parsed into file diffs at all; those are structural
/// failures that make it meaningless to look for per-hunk issues.
pub fn validate(text: &str) -> Result<ValidationReport, DiffError> {
    let mut errors = Vec::new();

    if text.contains("\r\n") {
        errors.push(ValidationIssue::ContainsCrlf);
    }
    if !text.is_empty() && !text.ends_with('\n') {
        errors.push(ValidationIssue::MissingTrailingNewline);
    }

    let files = parse_detailed(text)?;
    for file in &files {
        for hunk in &file.hunks {
            let mut old_actual = 0u64;
            let mut new_actual = 0u64;
            for line in &hunk.lines {
                match line.chars().next() {
                    Some(' ') => {
                        old_actual += 1;
                        new_actual += 1;
                    }
                    Some('-') => old_actual += 1,
                    Some('+') => new_actual += 1,
                    _ => {}
                }
            }
            if old_actual != hunk.old_count || new_actual != hunk.new_count {
                errors.push(ValidationIssue::Malformed(DiffError::HunkCountMismatch {
                    line: 0,
                    expected: (hunk.old_count, hunk.new_count),
                    actual: (old_actual, new_actual),
                }));
            }
        }
    }

    Ok(ValidationReport {
        valid: errors.is_empty(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_consistent_hunk() {
        let text = "--- a/x\n+++ b/x\n@@ -1,2 +1,2 @@\n line1\n-line2\n+LINE2\n";
        let report = validate(text).unwrap();
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn validate_collects_count_mismatch() {
        let text = "--- a/x\n+++ b/x\n@@ -1,5 +1,2 @@\n line1\n-line2\n+LINE2\n";
        let report = validate(text).unwrap();
        assert!(!report.valid);
        assert!(matches!(report.errors[0], ValidationIssue::Malformed(DiffError::HunkCountMismatch { .. })));
    }

    #[test]
    fn validate_rejects_empty_input_as_structural_error() {
        assert_eq!(validate("").unwrap_err(), DiffError::EmptyInput);
    }

    #[test]
    fn validate_flags_crlf() {
        let text = "--- a/x\r\n+++ b/x\r\n@@ -1,1 +1,1 @@\r\n-a\r\n+b\r\n";
        let report = validate(text).unwrap();
        assert!(!report.valid);
        assert!(report.errors.contains(&ValidationIssue::ContainsCrlf));
    }

    #[test]
    fn validate_flags_missing_trailing_newline() {
        let text = "--- a/x\n+++ b/x\n@@ -1,1 +1,1 @@\n-a\n+b";
        let report = validate(text).unwrap();
        assert!(!report.valid);
        assert!(report.errors.contains(&ValidationIssue::MissingTrailingNewline));
    }

    #[test]
    fn validate_collects_multiple_issues_at_once() {
        let text = "--- a/x\r\n+++ b/x\r\n@@ -1,1 +1,1 @@\r\n-a\r\n+b";
        let report = validate(text).unwrap();
        assert!(report.errors.contains(&ValidationIssue::ContainsCrlf));
        assert!(report.errors.contains(&ValidationIssue::MissingTrailingNewline));
    }
}
