//! Engine configuration (§2 "Config", §4.2, §4.4).
//!
//! Loaded from an optional `<workspace>/.continue-reasoning/config.toml`; a
//! missing file yields all defaults rather than an error, the same
//! `load()`/`parse()` split and per-section `Default` idiom `maw::config`
//! uses for `ManifoldConfig`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Relative path, from a workspace root, to the engine's config file.
pub const CONFIG_RELATIVE_PATH: &str = ".continue-reasoning/config.toml";

/// How `create_snapshot` reacts when unknown-change detection finds drift
/// (§4.6 step 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownChangeStrategy {
    /// Absorb the drift into a synthetic snapshot, then proceed.
    #[default]
    Warn,
    /// Same as `warn` — reserved for a future mode that also attempts to
    /// reconcile the drift with the intended diff before absorbing it.
    AutoFix,
    /// Fail the call with `EngineError::UnknownDrift`; commit nothing.
    Error,
}

/// Unknown-change detection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct UnknownChangeConfig {
    /// Whether drift detection runs at all before `create_snapshot`
    /// persists the intended snapshot.
    pub enabled: bool,
    /// What to do when drift is found.
    pub strategy: UnknownChangeStrategy,
}

impl Default for UnknownChangeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: UnknownChangeStrategy::default(),
        }
    }
}

/// The externalized-diff file format (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffExternalizationFormat {
    /// Fenced `diff` code block with a title header (default).
    #[default]
    Markdown,
    /// Raw unified diff text, no wrapping.
    Diff,
    /// Plain text with a banner line.
    Txt,
}

impl DiffExternalizationFormat {
    /// The file extension used for externalized diff files in this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Diff => "diff",
            Self::Txt => "txt",
        }
    }
}

/// Diff externalization settings (§4.3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiffStorageConfig {
    /// Whether diff text is written to a separate file (and the snapshot
    /// JSON stores only `diff_path`/`reverse_diff_path` plus a sentinel).
    pub save_diff_files: bool,
    /// The format used when `save_diff_files` is on.
    pub format: DiffExternalizationFormat,
}

impl Default for DiffStorageConfig {
    fn default() -> Self {
        Self {
            save_diff_files: false,
            format: DiffExternalizationFormat::default(),
        }
    }
}

/// Checkpoint content-capture and retention settings (§4.4, §9 "Optional
/// content capture").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CheckpointConfig {
    /// Whether checkpoints capture verbatim file contents alongside hashes,
    /// enabling accurate drift diffs instead of placeholders.
    pub save_latest_files: bool,
    /// Checkpoints older than this many days are pruned by `cleanup`.
    pub retention_days: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            save_latest_files: true,
            retention_days: 30,
        }
    }
}

/// Extra ignore patterns contributed by config, merged with
/// `.snapshotignore` and the built-in list (§4.2).
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IgnoreConfig {
    /// Gitignore-style patterns to exclude from unknown-change checking and
    /// from `affected_files` filtering, in addition to `.snapshotignore`.
    pub exclude_from_checking: Vec<String>,
}

/// The engine's full configuration (§2 "Config").
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Ignore-pattern settings.
    pub ignore: IgnoreConfig,
    /// Unknown-change (drift) detection settings.
    pub unknown_change: UnknownChangeConfig,
    /// Diff externalization settings.
    pub diff_storage: DiffStorageConfig,
    /// Checkpoint settings.
    pub checkpoint: CheckpointConfig,
}

impl EngineConfig {
    /// Load config from `<workspace>/.continue-reasoning/config.toml`.
    ///
    /// A missing file yields [`EngineConfig::default`], not an error —
    /// every section already has sensible defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file exists but cannot be read, or its
    /// contents fail to parse.
    pub fn load(workspace_path: &Path) -> Result<Self, ConfigError> {
        let path = workspace_path.join(CONFIG_RELATIVE_PATH);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path),
                    message: e.to_string(),
                });
            }
        };
        Self::parse(&content).map_err(|message| ConfigError { path: Some(path), message })
    }

    /// Parse config from TOML text, ignoring the filesystem.
    ///
    /// # Errors
    /// Returns a human-readable message (including line/column when `toml`
    /// reports one) if `text` is not valid `EngineConfig` TOML.
    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}

/// Failure loading or parsing `config.toml`.
#[derive(Debug)]
pub struct ConfigError {
    /// The file that failed to load or parse, if known.
    pub path: Option<PathBuf>,
    /// Human-readable explanation, including line/column when available.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "failed to load config from {}: {}\n  To fix: fix the TOML syntax or field name reported above, \
                 or delete the file to fall back to defaults.",
                path.display(),
                self.message
            ),
            None => write!(f, "failed to parse config: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn defaults_enable_unknown_change_detection_and_checkpoint_content() {
        let config = EngineConfig::default();
        assert!(config.unknown_change.enabled);
        assert_eq!(config.unknown_change.strategy, UnknownChangeStrategy::Warn);
        assert!(config.checkpoint.save_latest_files);
        assert!(!config.diff_storage.save_diff_files);
    }

    #[test]
    fn parse_overrides_individual_sections() {
        let toml_text = r#"
            [unknown_change]
            strategy = "error"

            [diff_storage]
            save_diff_files = true
            format = "diff"
        "#;
        let config = EngineConfig::parse(toml_text).unwrap();
        assert_eq!(config.unknown_change.strategy, UnknownChangeStrategy::Error);
        assert!(config.unknown_change.enabled, "untouched fields keep their default");
        assert!(config.diff_storage.save_diff_files);
        assert_eq!(config.diff_storage.format, DiffExternalizationFormat::Diff);
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let toml_text = "made_up_field = true";
        assert!(EngineConfig::parse(toml_text).is_err());
    }

    #[test]
    fn parse_rejects_unknown_field_within_a_section() {
        let toml_text = "[checkpoint]\nbogus = 1";
        assert!(EngineConfig::parse(toml_text).is_err());
    }

    #[test]
    fn load_surfaces_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".continue-reasoning")).unwrap();
        std::fs::write(dir.path().join(CONFIG_RELATIVE_PATH), "not valid toml === ").unwrap();
        let err = EngineConfig::load(dir.path()).unwrap_err();
        assert!(err.path.is_some());
        assert!(err.to_string().contains("To fix"));
    }

    #[test]
    fn diff_extension_matches_format() {
        assert_eq!(DiffExternalizationFormat::Markdown.extension(), "md");
        assert_eq!(DiffExternalizationFormat::Diff.extension(), "diff");
        assert_eq!(DiffExternalizationFormat::Txt.extension(), "txt");
    }
}
