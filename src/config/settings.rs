//! Loading and saving of the configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::AppConfig;

const CONFIG_FILE_NAME: &str = "config.json";

/// Platform configuration directory for this application, e.g.
/// `~/.config/promptpack` on Linux.
pub fn get_config_directory() -> Option<PathBuf> {
    ProjectDirs::from("com", "promptpack", "PromptPack")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

fn resolve_config_path(path_override: Option<&Path>) -> Result<PathBuf> {
    match path_override {
        Some(path) => Ok(path.to_path_buf()),
        None => get_config_directory()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .context("could not determine a configuration directory for this platform"),
    }
}

/// Loads the configuration, creating a default file on first run.
///
/// A file that exists but does not parse is treated as corrupt: a
/// warning is logged and defaults are returned without overwriting the
/// file, so a hand-edited config is preserved for inspection.
/// `path_override` bypasses the platform directory and is primarily a
/// test seam.
pub fn load_config(path_override: Option<&Path>) -> Result<AppConfig> {
    let path = resolve_config_path(path_override)?;
    if !path.exists() {
        let config = AppConfig::default();
        save_config(&config, Some(&path))?;
        tracing::info!("Created default configuration at {}", path.display());
        return Ok(config);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str(&raw) {
        Ok(config) => Ok(config),
        Err(e) => {
            tracing::warn!(
                "Configuration file {} is corrupt ({e}), using defaults",
                path.display()
            );
            Ok(AppConfig::default())
        }
    }
}

/// Serializes `config` as pretty JSON, creating parent directories as
/// needed.
pub fn save_config(config: &AppConfig, path_override: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(path_override)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_load_creates_a_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.max_file_size_mb = 3;
        config.base_prompt = "summarize".to_string();
        save_config(&config, Some(&path)).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults_without_overwriting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded, AppConfig::default());
        // The broken file is left in place for the user to inspect.
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("config.json");

        save_config(&AppConfig::default(), Some(&path)).unwrap();
        assert!(path.exists());
    }
}
