//! Content hashing (§6 "Hash format").
//!
//! Two distinct hashes appear in snapshot data: an 8-hex-char SHA-256
//! fingerprint used to detect whether a file's content changed, and a
//! 7-hex-char SHA-1 hash matching Git's blob hashing, used only to populate
//! the `index` line of generated unified diffs so they look like real `git
//! diff` output to tooling that parses it.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// SHA-256 of `content`, truncated to the first 8 hex characters.
///
/// Used as a cheap fingerprint to decide whether a file changed between two
/// snapshots. Collisions within a workspace's lifetime are not a realistic
/// concern at this truncation for that purpose.
#[must_use]
pub fn short_sha256(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex_prefix(&digest, 8)
}

/// Read and hash a file's content with [`short_sha256`].
///
/// Returns an empty string if the file cannot be read (missing, permission
/// denied, not a regular file). Callers treat an empty hash as "absent" per
/// the file-hash convention.
#[must_use]
pub fn short_sha256_of_file(path: &std::path::Path) -> String {
    match std::fs::read(path) {
        Ok(content) => short_sha256(&content),
        Err(_) => String::new(),
    }
}

/// Git's blob hash: SHA-1 of `"blob {len}\0{content}"`, truncated to the
/// first 7 hex characters — the width Git itself uses in abbreviated
/// `index` lines.
#[must_use]
pub fn git_blob_sha1(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    let digest = hasher.finalize();
    hex_prefix(&digest, 7)
}

/// The all-zero Git blob id Git itself uses for a nonexistent side of a
/// create/delete diff.
pub const NULL_BLOB: &str = "0000000";

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}
