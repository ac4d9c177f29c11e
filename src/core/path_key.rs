//! Normalized path keys for cache identity.
//!
//! A [`PathKey`] is the canonical spelling of a file path: redundant `.`
//! and `..` components are collapsed lexically, separators are unified to
//! `/`, and on case-insensitive platforms the whole key is case-folded.
//! Keys are derived on every cache lookup or insert and are never
//! persisted, so two spellings of the same on-disk entry always land on
//! the same cache slot within a session.

use std::fmt;
use std::path::{Component, Path};

use serde::Serialize;

/// Canonical cache identity for a file path.
///
/// Construction is purely lexical; no filesystem access takes place, so
/// symlinked spellings of the same file intentionally produce distinct
/// keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PathKey(String);

impl PathKey {
    /// Builds the key for `path` by normalizing its components.
    pub fn from_path(path: &Path) -> Self {
        PathKey(normalize(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte length of the key, used by the cache memory estimate.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapses `.`/`..`, joins components with `/` and applies the
/// platform case fold. Leading `..` components of a relative path are
/// kept because they cannot be resolved without touching the filesystem.
fn normalize(path: &Path) -> String {
    let mut segments: Vec<String> = Vec::new();
    let mut prefix = String::new();
    let mut is_absolute = false;

    for component in path.components() {
        match component {
            Component::Prefix(p) => {
                prefix = p.as_os_str().to_string_lossy().replace('\\', "/");
            }
            Component::RootDir => is_absolute = true,
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match segments.last() {
                    Some(last) if last != ".." => {
                        segments.pop();
                        true
                    }
                    _ => false,
                };
                if !popped && !is_absolute {
                    segments.push("..".to_string());
                }
            }
            Component::Normal(seg) => segments.push(seg.to_string_lossy().into_owned()),
        }
    }

    let mut key = prefix;
    if is_absolute {
        key.push('/');
    }
    key.push_str(&segments.join("/"));
    if key.is_empty() {
        key.push('.');
    }
    fold_case(key)
}

#[cfg(any(windows, target_os = "macos"))]
fn fold_case(key: String) -> String {
    key.to_lowercase()
}

#[cfg(not(any(windows, target_os = "macos")))]
fn fold_case(key: String) -> String {
    key
}
