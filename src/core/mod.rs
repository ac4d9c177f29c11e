//! Core engine: scanning, classification, tree state, caching and
//! content aggregation. Everything here is UI-agnostic; the `app`
//! layer drives these pieces and forwards their results to whatever
//! shell embeds the library.

pub mod aggregator;
pub mod cache;
pub mod error;
pub mod ignore;
pub mod outline;
pub mod path_key;
pub mod scanner;
pub mod tokens;
pub mod tree;

pub use aggregator::{AggregationEngine, AggregationResult, GenerateRequest, OutputFormat};
pub use cache::{CacheStats, ContentCache};
pub use error::CoreError;
pub use ignore::IgnoreRules;
pub use path_key::PathKey;
pub use scanner::{ScanEntry, ScanOutcome, Scanner};
pub use tokens::{TokenCounter, TokenCounterOperations};
pub use tree::{NodeId, NodeKind, TreeNode, TreeState};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Progress snapshot emitted at a bounded rate during long operations.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Progress {
    /// Entries handled so far.
    pub processed: usize,
    /// Total entry count when known; zero while a scan is still
    /// discovering the tree.
    pub total: usize,
    /// Seconds since the operation started.
    pub elapsed_secs: f64,
}

/// The single selection set shared between the tree and the
/// aggregation engine.
///
/// Entries are the tree's canonical absolute paths; normalization to a
/// [`PathKey`] happens at the cache boundary, not here. Mutation always
/// happens under the application state lock, and a generation takes a
/// [`snapshot_sorted`](Self::snapshot_sorted) copy at call time so
/// concurrent selection changes cannot affect a running aggregation.
#[derive(Debug, Default, Clone)]
pub struct SelectedFileSet(HashSet<PathBuf>);

impl SelectedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.0.insert(path)
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.0.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.0.iter()
    }

    pub fn retain(&mut self, keep: impl FnMut(&PathBuf) -> bool) {
        self.0.retain(keep)
    }

    /// Replaces the whole selection.
    pub fn replace_all(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.0 = paths.into_iter().collect();
    }

    /// Stable, sorted copy for a generation to work from.
    pub fn snapshot_sorted(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.0.iter().cloned().collect();
        paths.sort();
        paths
    }
}

impl FromIterator<PathBuf> for SelectedFileSet {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
