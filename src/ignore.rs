//! Gitignore-style file filtering (§4.2).
//!
//! Wraps the `ignore` crate's `gitignore::Gitignore` matcher (the crate
//! ripgrep itself uses) rather than hand-rolling a glob matcher. `!`-negation
//! is accepted by the underlying matcher but this module's public surface
//! does not document or test it — per the stated v1 non-goal, negation
//! support is incidental, not a guarantee.

use std::fmt;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// The name of the per-workspace ignore file.
pub const IGNORE_FILE_NAME: &str = ".snapshotignore";

/// The engine's own state directory, always ignored so the history store
/// never snapshots itself.
pub const STATE_DIR: &str = ".continue-reasoning";

/// Patterns always in effect, regardless of `.snapshotignore` contents or
/// config (§4.2 "built-in list").
pub const BUILTIN_PATTERNS: &[&str] = &[STATE_DIR, "node_modules/**", ".git/**", "*.log", "**/tmp/**"];

/// Default `.snapshotignore` content written when the workspace has none.
const DEFAULT_IGNORE_CONTENT: &str = "\
# Snapshot engine ignore rules (gitignore syntax).
.continue-reasoning/
node_modules/
.git/
*.log
**/tmp/
";

/// Failure modes for the ignore manager.
#[derive(Debug)]
pub enum IgnoreError {
    /// Reading or writing `.snapshotignore` failed.
    Io(std::io::Error),
    /// A pattern (from the ignore file, config, or built-ins) could not be
    /// compiled by the underlying matcher.
    InvalidPattern { pattern: String, reason: String },
}

impl fmt::Display for IgnoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to access {IGNORE_FILE_NAME}: {e}"),
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid ignore pattern {pattern:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for IgnoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidPattern { .. } => None,
        }
    }
}

impl From<std::io::Error> for IgnoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Diagnostic snapshot of the ignore manager's state (§4.2 `info`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoreInfo {
    /// Absolute path to `.snapshotignore`.
    pub path: PathBuf,
    /// Whether `.snapshotignore` exists on disk.
    pub exists: bool,
    /// All patterns currently in effect (file + config + built-in), in the
    /// order they were merged.
    pub patterns: Vec<String>,
    /// Whether the matcher has been built from those patterns.
    pub loaded: bool,
}

/// Gitignore-style filtering for one workspace.
pub struct IgnoreManager {
    workspace_path: PathBuf,
    config_patterns: Vec<String>,
    patterns: Vec<String>,
    matcher: Gitignore,
}

impl IgnoreManager {
    /// Ensure `.snapshotignore` exists under `workspace_path` (writing the
    /// default content if missing), then parse it and build the matcher.
    ///
    /// # Errors
    /// Returns [`IgnoreError::Io`] if the file cannot be created or read, or
    /// [`IgnoreError::InvalidPattern`] if a pattern fails to compile.
    pub fn init(workspace_path: &Path, config_patterns: Vec<String>) -> Result<Self, IgnoreError> {
        let ignore_path = workspace_path.join(IGNORE_FILE_NAME);
        if !ignore_path.exists() {
            std::fs::write(&ignore_path, DEFAULT_IGNORE_CONTENT)?;
        }
        let mut manager = Self {
            workspace_path: workspace_path.to_path_buf(),
            config_patterns,
            patterns: Vec::new(),
            matcher: GitignoreBuilder::new(workspace_path).build().expect("empty gitignore builder never fails"),
        };
        manager.reload()?;
        Ok(manager)
    }

    /// Re-read `.snapshotignore` and recompute the matcher from it, the
    /// configured patterns, and the built-in list.
    ///
    /// # Errors
    /// Returns [`IgnoreError::Io`] if `.snapshotignore` cannot be read, or
    /// [`IgnoreError::InvalidPattern`] if a pattern fails to compile.
    pub fn reload(&mut self) -> Result<(), IgnoreError> {
        let ignore_path = self.workspace_path.join(IGNORE_FILE_NAME);
        let file_content = std::fs::read_to_string(&ignore_path)?;

        let mut patterns: Vec<String> = file_content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_owned)
            .collect();
        patterns.extend(self.config_patterns.iter().cloned());
        patterns.extend(BUILTIN_PATTERNS.iter().map(|s| (*s).to_owned()));

        let mut builder = GitignoreBuilder::new(&self.workspace_path);
        for pattern in &patterns {
            builder.add_line(None, pattern).map_err(|e| IgnoreError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        self.matcher = builder.build().map_err(|e| IgnoreError::InvalidPattern {
            pattern: String::new(),
            reason: e.to_string(),
        })?;
        self.patterns = patterns;
        Ok(())
    }

    /// Return the subset of `paths` that match no ignore pattern.
    ///
    /// Paths may be absolute or workspace-relative; both are normalized
    /// relative to the workspace root before matching.
    #[must_use]
    pub fn filter_ignored(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|p| {
                let relative = p.strip_prefix(&self.workspace_path).unwrap_or(p);
                !self.path_is_ignored(relative, relative.to_string_lossy().ends_with('/'))
            })
            .cloned()
            .collect()
    }

    /// Whether a single workspace-relative `path` matches an ignore
    /// pattern. `is_dir` must reflect whether `path` names a directory —
    /// trailing-slash patterns like `node_modules/` only match those.
    ///
    /// Exposed (in addition to the batch [`Self::filter_ignored`]) so a
    /// workspace walk — the checkpoint manager's baseline scan, for one —
    /// can test each entry against the same rules this manager enforces
    /// for declared edits, without collecting the whole tree into a `Vec`
    /// first.
    #[must_use]
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let relative = path.strip_prefix(&self.workspace_path).unwrap_or(path);
        self.path_is_ignored(relative, is_dir)
    }

    fn path_is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.matcher.matched(relative, is_dir).is_ignore()
    }

    /// A diagnostic snapshot of this manager's current state.
    #[must_use]
    pub fn info(&self) -> IgnoreInfo {
        let path = self.workspace_path.join(IGNORE_FILE_NAME);
        IgnoreInfo {
            exists: path.exists(),
            path,
            patterns: self.patterns.clone(),
            loaded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_default_ignore_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IgnoreManager::init(dir.path(), Vec::new()).unwrap();
        assert!(dir.path().join(IGNORE_FILE_NAME).exists());
        assert!(manager.info().exists);
    }

    #[test]
    fn builtin_state_dir_is_always_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IgnoreManager::init(dir.path(), Vec::new()).unwrap();
        let kept = manager.filter_ignored(&[dir.path().join(STATE_DIR).join("snapshots/index.json")]);
        assert!(kept.is_empty());
    }

    #[test]
    fn config_patterns_are_merged_in() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IgnoreManager::init(dir.path(), vec!["secrets/**".to_owned()]).unwrap();
        let kept = manager.filter_ignored(&[dir.path().join("secrets/key.pem")]);
        assert!(kept.is_empty());
    }

    #[test]
    fn unrelated_paths_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IgnoreManager::init(dir.path(), Vec::new()).unwrap();
        let kept = manager.filter_ignored(&[dir.path().join("src/main.rs")]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn is_ignored_matches_single_path_like_the_batch_form() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IgnoreManager::init(dir.path(), vec!["secrets/**".to_owned()]).unwrap();
        assert!(manager.is_ignored(&dir.path().join("secrets/key.pem"), false));
        assert!(!manager.is_ignored(&dir.path().join("src/main.rs"), false));
    }

    #[test]
    fn reload_picks_up_edited_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = IgnoreManager::init(dir.path(), Vec::new()).unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE_NAME), "custom/**\n").unwrap();
        manager.reload().unwrap();
        let kept = manager.filter_ignored(&[dir.path().join("custom/file.txt")]);
        assert!(kept.is_empty());
    }
}
