//! Exclusion rules for scans and tree population.
//!
//! Three layers combine into one decision: the repository's own
//! `.gitignore` (full gitignore semantics including negation), the
//! user's configured glob patterns, and directory-class toggles such as
//! "skip node_modules". `.git` itself is always excluded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::config::AppConfig;
use crate::core::error::CoreError;

/// Directory names treated as virtual environments.
const VIRTUAL_ENV_DIR_NAMES: [&str; 4] = ["venv", ".venv", "virtualenv", ".virtualenv"];

/// Compiled exclusion rules for one scan root.
///
/// Building never fails: unreadable `.gitignore` files and malformed
/// patterns are logged and skipped so a single bad line cannot disable
/// scanning.
pub struct IgnoreRules {
    root: PathBuf,
    gitignore: Gitignore,
    extra: GlobSet,
    flagged_dirs: Vec<&'static str>,
    exclude_test_files: bool,
}

impl IgnoreRules {
    /// Compiles the rules for `root` from the repository's `.gitignore`
    /// and the configured patterns and toggles.
    pub fn build(root: &Path, config: &AppConfig) -> Self {
        let gitignore = load_gitignore(root);
        let extra = match build_globset_from_patterns(&config.ignore_patterns) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("Could not compile ignore patterns: {e}");
                GlobSet::empty()
            }
        };

        let mut flagged_dirs = Vec::new();
        if config.exclude_node_modules {
            flagged_dirs.push("node_modules");
        }
        if config.exclude_dist {
            flagged_dirs.push("dist");
        }
        if config.exclude_coverage {
            flagged_dirs.extend(["coverage", "htmlcov", ".nyc_output"]);
        }
        if config.exclude_virtual_envs {
            flagged_dirs.extend(VIRTUAL_ENV_DIR_NAMES);
        }

        tracing::debug!(
            gitignore_rules = gitignore.num_ignores() + gitignore.num_whitelists(),
            extra_patterns = extra.len(),
            flagged_dirs = flagged_dirs.len(),
            "Compiled ignore rules for {}",
            root.display()
        );

        Self {
            root: root.to_path_buf(),
            gitignore,
            extra,
            flagged_dirs,
            exclude_test_files: config.exclude_test_files,
        }
    }

    /// Decides whether `path` is excluded. Works for paths outside the
    /// scan root too, in which case only segment and pattern matching
    /// apply since gitignore rules are anchored to the root.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        if path.components().any(|c| c.as_os_str() == ".git") {
            return true;
        }
        if self.has_flagged_component(path) {
            return true;
        }
        if self.exclude_test_files && !is_dir && is_test_file_name(path) {
            return true;
        }

        match path.strip_prefix(&self.root) {
            Ok(rel) if !rel.as_os_str().is_empty() => {
                self.extra.is_match(rel)
                    || self
                        .gitignore
                        .matched_path_or_any_parents(rel, is_dir)
                        .is_ignore()
            }
            _ => self.extra.is_match(path),
        }
    }

    fn has_flagged_component(&self, path: &Path) -> bool {
        if self.flagged_dirs.is_empty() {
            return false;
        }
        path.components().any(|c| {
            self.flagged_dirs
                .iter()
                .any(|dir| c.as_os_str() == *dir)
        })
    }
}

fn load_gitignore(root: &Path) -> Gitignore {
    let file = root.join(".gitignore");
    if !file.is_file() {
        return Gitignore::empty();
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(&file) {
        tracing::warn!("Failed to parse {}: {err}", file.display());
    }
    match builder.build() {
        Ok(gitignore) => gitignore,
        Err(err) => {
            tracing::warn!("Failed to build gitignore matcher: {err}");
            Gitignore::empty()
        }
    }
}

/// Compiles user glob patterns into a single matcher.
///
/// A bare name like `target` or a directory pattern like `target/` is
/// expanded so it matches at any depth and also hides everything inside
/// the directory. Malformed patterns are skipped with a warning.
pub fn build_globset_from_patterns(patterns: &HashSet<String>) -> Result<GlobSet, CoreError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let clean = pattern.trim().trim_end_matches('/');
        if clean.is_empty() {
            continue;
        }
        let variants = [
            clean.to_string(),
            format!("**/{clean}"),
            format!("{clean}/**"),
            format!("**/{clean}/**"),
        ];
        for variant in variants {
            match Glob::new(&variant) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed ignore pattern '{variant}': {e}");
                }
            }
        }
    }
    Ok(builder.build()?)
}

fn is_test_file_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_lowercase();
    let Some((stem, _ext)) = lower.rsplit_once('.') else {
        return false;
    };
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
        || stem == "test"
        || stem == "conftest"
}
