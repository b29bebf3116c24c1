//! Snapshot identifier generation (§6 "Identifier format", §9 "Randomness").
//!
//! Snapshot ids are 6 lowercase `[a-z0-9]` characters. The generator takes an
//! injected entropy source so tests can pin the sequence of generated ids or
//! force a collision to exercise the retry path.

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 6;

/// A source of random bytes for id generation.
pub trait IdSource: Send + Sync {
    /// Fill `buf` with random bytes.
    fn fill_bytes(&self, buf: &mut [u8]);
}

/// Draws from the operating system's CSPRNG via `rand`. The default for
/// production use.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl IdSource for OsEntropy {
    fn fill_bytes(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rng().fill_bytes(buf);
    }
}

/// Replays a fixed sequence of byte chunks, one per call, then repeats the
/// last chunk forever. Used in tests to pin generated ids, or to force a
/// collision by repeating the same chunk twice in a row.
#[derive(Debug)]
pub struct ScriptedEntropy {
    chunks: Vec<Vec<u8>>,
    next: std::sync::atomic::AtomicUsize,
}

impl ScriptedEntropy {
    /// Build an entropy source that yields `chunks` in order, then repeats
    /// the final chunk forever.
    #[must_use]
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        assert!(!chunks.is_empty(), "ScriptedEntropy needs at least one chunk");
        Self {
            chunks,
            next: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl IdSource for ScriptedEntropy {
    fn fill_bytes(&self, buf: &mut [u8]) {
        let idx = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let chunk = &self.chunks[idx.min(self.chunks.len() - 1)];
        for (slot, byte) in buf.iter_mut().zip(chunk.iter().cycle()) {
            *slot = *byte;
        }
    }
}

/// Render `ID_LEN` random bytes from `source` as a lowercase `[a-z0-9]` string.
fn draw(source: &dyn IdSource) -> String {
    let mut raw = [0u8; ID_LEN];
    source.fill_bytes(&mut raw);
    raw.iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect()
}

/// Generate a fresh 6-character id that does not collide with `existing`,
/// retrying against `source` until a free id is drawn.
///
/// # Panics
/// Panics if no free id is found within a generous bound (`existing` would
/// have to cover a large fraction of the `36^6` id space for this to trigger
/// — treated as a broken entropy source rather than a recoverable error).
pub fn generate_unique_id(source: &dyn IdSource, existing: &std::collections::HashSet<String>) -> String {
    const MAX_ATTEMPTS: usize = 10_000;
    for _ in 0..MAX_ATTEMPTS {
        let candidate = draw(source);
        if !existing.contains(&candidate) {
            return candidate;
        }
    }
    panic!("exhausted {MAX_ATTEMPTS} attempts generating a unique snapshot id");
}
