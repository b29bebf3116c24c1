//! Pure, I/O-free unified diff parsing, generation, validation, reversal,
//! and merging (§4.1).
//!
//! Everything here operates on in-memory text; none of these functions
//! touch the filesystem or the workspace. Generation leans on the `similar`
//! crate for the underlying line-diff computation; parsing, validation,
//! reversal, and merging are hand-written text transforms since they encode
//! this crate's own wire format rather than anything `similar` produces.

mod generate;
mod merge;
mod parse;
mod reverse;
mod types;
mod util;
mod validate;

pub use generate::{generate_unified_diff, GenerateOptions};
pub use merge::{merge, Conflict, ConflictResolution, MergeOptions, MergeResult};
pub use parse::{parse_detailed, parse_multi_file_diff};
pub use reverse::{reverse, ReverseOptions};
pub use types::{DiffError, FileDiff, Hunk, RawFileDiff};
pub use util::{
    add_file_hashes_to_diff, clean_timestamps, count_changes, ensure_trailing_newline, extract_file_path,
    is_file_creation, is_file_deletion,
};
pub use validate::{validate, ValidationIssue, ValidationReport};

#[cfg(test)]
mod properties;
