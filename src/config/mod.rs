//! Application configuration.
//!
//! [`AppConfig`] is the single settings object handed to the core at
//! startup. It is persisted as JSON via [`settings`]; unknown fields in
//! an older or newer file are ignored and missing fields fall back to
//! their defaults, so config files survive version changes in both
//! directions.

pub mod settings;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::aggregator::OutputFormat;

const DEFAULT_MAX_FILE_SIZE_MB: u64 = 20;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 256;
const DEFAULT_CACHE_MAX_MEMORY_MB: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Free-form glob patterns excluded from scans, in addition to the
    /// repository's own `.gitignore`. A trailing `/` marks a directory
    /// pattern that also hides everything beneath it.
    pub ignore_patterns: HashSet<String>,

    /// Directory-class toggles applied on top of `ignore_patterns`.
    pub exclude_node_modules: bool,
    pub exclude_dist: bool,
    pub exclude_coverage: bool,
    pub exclude_virtual_envs: bool,

    /// When set, files whose names look like tests (`test_*.py`,
    /// `*_test.go`, `*.spec.ts`, ...) are skipped.
    pub exclude_test_files: bool,

    /// Per-extension overrides for the text classifier, keyed by
    /// lowercase extension without the dot. `true` forces an extension
    /// to be treated as text, `false` as binary.
    pub extension_overrides: HashMap<String, bool>,

    /// Exact basenames never treated as text regardless of extension.
    pub excluded_filenames: HashSet<String>,

    /// Files larger than this are never classified as text.
    pub max_file_size_mb: u64,

    /// Content cache bounds.
    pub cache_max_entries: usize,
    pub cache_max_memory_mb: usize,

    /// Output envelope for generated aggregates.
    pub output_format: OutputFormat,

    /// Prepend an ASCII outline of the scanned tree to the aggregate.
    pub include_outline: bool,

    /// Free-form prompt text emitted as the first section of the
    /// aggregate when non-empty.
    pub base_prompt: String,

    /// When set, scans are rejected unless the requested root resolves
    /// to a path beneath this directory.
    pub allowed_scan_root: Option<PathBuf>,

    /// Cap for expand-all; `None` samples the real directory depth.
    pub max_expand_depth: Option<usize>,

    /// Last directory loaded, restored on next start.
    pub last_directory: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            exclude_node_modules: true,
            exclude_dist: true,
            exclude_coverage: true,
            exclude_virtual_envs: true,
            exclude_test_files: false,
            extension_overrides: HashMap::new(),
            excluded_filenames: default_excluded_filenames(),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_max_memory_mb: DEFAULT_CACHE_MAX_MEMORY_MB,
            output_format: OutputFormat::Markdown,
            include_outline: true,
            base_prompt: String::new(),
            allowed_scan_root: None,
            max_expand_depth: None,
            last_directory: None,
        }
    }
}

impl AppConfig {
    /// Loads the persisted configuration, falling back to defaults when
    /// no file exists or the file cannot be read.
    pub fn load() -> Self {
        match settings::load_config(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Could not load configuration, using defaults: {e}");
                Self::default()
            }
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn cache_max_memory_bytes(&self) -> usize {
        self.cache_max_memory_mb.saturating_mul(1024 * 1024)
    }
}

fn default_ignore_patterns() -> HashSet<String> {
    [
        "target/",
        ".idea/",
        ".vscode/",
        "__pycache__/",
        ".pytest_cache/",
        ".mypy_cache/",
        "*.pyc",
        "*.class",
        "*.o",
        ".DS_Store",
        "Thumbs.db",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_excluded_filenames() -> HashSet<String> {
    ["package-lock.json", "yarn.lock", "pnpm-lock.yaml", "Cargo.lock"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert!(config.exclude_node_modules);
        assert!(!config.exclude_test_files);
        assert_eq!(config.output_format, OutputFormat::Markdown);
        assert_eq!(config.max_file_size_bytes(), 20 * 1024 * 1024);
        assert!(config.ignore_patterns.contains("target/"));
        assert!(config.excluded_filenames.contains("package-lock.json"));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"max_file_size_mb": 5}"#).unwrap();
        assert_eq!(config.max_file_size_mb, 5);
        assert_eq!(config.cache_max_entries, AppConfig::default().cache_max_entries);
        assert!(config.include_outline);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let config: AppConfig =
            serde_json::from_str(r#"{"some_future_flag": true, "base_prompt": "hi"}"#).unwrap();
        assert_eq!(config.base_prompt, "hi");
    }

    #[test]
    fn round_trips_through_json() {
        let mut config = AppConfig::default();
        config.base_prompt = "You are reviewing this code.".to_string();
        config.output_format = OutputFormat::Xml;
        config.extension_overrides.insert("dat".to_string(), true);

        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
