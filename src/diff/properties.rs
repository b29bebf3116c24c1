//! Property tests for the diff module's round-trip and idempotence laws:
//! `parse(generate(a, b)) ≈ (a, b)`, `reverse(reverse(d)) = d`, and
//! `merge([d]) = normalize(d)`.

use proptest::prelude::*;

use super::generate::{generate_unified_diff, GenerateOptions};
use super::merge::{merge, MergeOptions};
use super::parse::{parse_detailed, parse_multi_file_diff};
use super::reverse::{reverse, ReverseOptions};

/// A single line of text drawn from a small alphabet, never containing a
/// newline itself — `TextDiff::from_lines` operates line-by-line and this
/// crate's wire format has no escaping for embedded newlines.
fn line() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,12}"
}

/// A small document: 0-6 lines, each terminated with `\n`.
fn document() -> impl Strategy<Value = String> {
    prop::collection::vec(line(), 0..6).prop_map(|lines| {
        if lines.is_empty() {
            String::new()
        } else {
            let mut s = lines.join("\n");
            s.push('\n');
            s
        }
    })
}

fn reconstruct_new_side(hunks: &[super::types::Hunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        for line in &hunk.lines {
            if let Some(rest) = line.strip_prefix('+').or_else(|| line.strip_prefix(' ')) {
                out.push_str(rest);
                out.push('\n');
            }
        }
    }
    out
}

fn reconstruct_old_side(hunks: &[super::types::Hunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        for line in &hunk.lines {
            if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix(' ')) {
                out.push_str(rest);
                out.push('\n');
            }
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Generating a diff between two arbitrary small documents and parsing
    /// it back out recovers both the path pair and the content transition.
    #[test]
    fn parse_of_generate_recovers_content_and_paths(old in document(), new in document()) {
        prop_assume!(old != new);
        let text = generate_unified_diff(
            &old,
            &new,
            &GenerateOptions { old_path: Some("x".to_owned()), new_path: Some("x".to_owned()), ..Default::default() },
        );

        let raw = parse_multi_file_diff(&text).unwrap();
        prop_assert_eq!(raw.len(), 1);
        prop_assert_eq!(&raw[0].old_path, "a/x");
        prop_assert_eq!(&raw[0].new_path, "b/x");

        let files = parse_detailed(&text).unwrap();
        prop_assert_eq!(files.len(), 1);
        prop_assert_eq!(reconstruct_new_side(&files[0].hunks), new);
        prop_assert_eq!(reconstruct_old_side(&files[0].hunks), old);
    }

    /// Reversing a generated diff twice returns the exact original text
    /// (no timestamps or git headers are involved, so there is nothing for
    /// "modulo normalization" to absorb here).
    #[test]
    fn reverse_is_its_own_inverse(old in document(), new in document()) {
        prop_assume!(old != new);
        let text = generate_unified_diff(
            &old,
            &new,
            &GenerateOptions { old_path: Some("x".to_owned()), new_path: Some("x".to_owned()), ..Default::default() },
        );
        let once = reverse(&text, &ReverseOptions::default()).unwrap();
        let twice = reverse(&once, &ReverseOptions::default()).unwrap();
        prop_assert_eq!(twice, text);
    }

    /// Merging a single-file, single-input diff list is a passthrough: with
    /// no other diffs to interleave and no conflicts possible, the output
    /// is byte-for-byte the normalized form of the input.
    #[test]
    fn merge_of_singleton_is_passthrough(old in document(), new in document()) {
        prop_assume!(old != new);
        let text = generate_unified_diff(
            &old,
            &new,
            &GenerateOptions { old_path: Some("x".to_owned()), new_path: Some("x".to_owned()), ..Default::default() },
        );
        let result = merge(&[text.clone()], &MergeOptions { preserve_git_headers: false, ..MergeOptions::default() }).unwrap();
        prop_assert!(result.ok);
        prop_assert!(result.conflicts.is_empty());
        prop_assert_eq!(result.merged_text, text);
    }
}
