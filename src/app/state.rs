//! Central, mutable state of the library.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::{
    AggregationResult, ContentCache, IgnoreRules, ScanEntry, SelectedFileSet, TokenCounter,
    TreeState,
};

/// Everything the command handlers and background tasks share.
///
/// Wrapped in an `Arc<Mutex<...>>` by the embedder. Lock discipline:
/// hold the lock for short mutation windows only, never across
/// filesystem I/O; the tasks module snapshots what it needs and
/// re-locks to apply results.
pub struct AppState {
    /// The application's configuration settings.
    pub config: AppConfig,
    /// Canonicalized root of the currently loaded directory.
    pub root: Option<PathBuf>,
    /// Lazily populated directory tree over the loaded root.
    pub tree: TreeState,
    /// The set of files currently selected for aggregation.
    pub selected: SelectedFileSet,
    /// All text files found by the last scan, sorted.
    pub scanned_files: Vec<PathBuf>,
    /// Every entry the last scan kept, for outline rendering.
    pub scanned_entries: Arc<Vec<ScanEntry>>,
    /// Ignore rules compiled for the loaded root.
    pub rules: Option<Arc<IgnoreRules>>,
    /// Bounded cache of file contents shared with aggregation runs.
    pub cache: Arc<ContentCache>,
    /// Shared token counter; encoder initialization is lazy.
    pub tokens: Arc<TokenCounter>,
    /// Current tree filter query, empty when inactive.
    pub filter_query: String,
    pub is_scanning: bool,
    pub is_generating: bool,
    /// Diagnostics accumulated by the last scan.
    pub scan_errors: Vec<String>,
    /// One-line status for display.
    pub status: String,
    /// Handle to the running scan task, if any.
    pub scan_task: Option<JoinHandle<()>>,
    /// Flag polled by the running scan task.
    pub scan_cancel: Arc<AtomicBool>,
    /// Handle to the running generation task, if any.
    pub generation_task: Option<JoinHandle<()>>,
    /// Monotonic counter attached to aggregation runs; results carrying
    /// an older epoch are discarded as stale.
    pub generation_epoch: u64,
    /// The most recent aggregation result that was not stale.
    pub last_result: Option<Box<AggregationResult>>,
    /// Alternate settings file location. Production leaves this `None`;
    /// tests point it into a tempdir so nothing touches the real
    /// configuration.
    pub settings_override: Option<PathBuf>,
}

impl Default for AppState {
    /// Loads the configuration from disk, falling back to defaults.
    fn default() -> Self {
        Self::with_config(AppConfig::load())
    }
}

impl AppState {
    /// Builds a fresh state around an explicit configuration. Tests use
    /// this to stay independent of any on-disk settings file.
    pub fn with_config(config: AppConfig) -> Self {
        let cache = Arc::new(ContentCache::new(
            config.cache_max_entries,
            config.cache_max_memory_bytes(),
        ));
        Self {
            config,
            root: None,
            tree: TreeState::new(),
            selected: SelectedFileSet::new(),
            scanned_files: Vec::new(),
            scanned_entries: Arc::new(Vec::new()),
            rules: None,
            cache,
            tokens: Arc::new(TokenCounter::new()),
            filter_query: String::new(),
            is_scanning: false,
            is_generating: false,
            scan_errors: Vec::new(),
            status: "Ready.".to_string(),
            scan_task: None,
            scan_cancel: Arc::new(AtomicBool::new(false)),
            generation_task: None,
            generation_epoch: 0,
            last_result: None,
            settings_override: None,
        }
    }

    /// Cancels the running scan task, if any, and resets the scanning
    /// state. The cancellation flag is also set so a task that is past
    /// its last abort point still exits at the next poll.
    pub fn cancel_current_scan(&mut self) {
        if let Some(handle) = self.scan_task.take() {
            tracing::info!("Aborting active scan task");
            handle.abort();
            self.scan_cancel.store(true, Ordering::SeqCst);
            self.is_scanning = false;
            self.status = "Scan cancelled.".to_string();
        }
    }

    /// Cancels the running generation task, if any. Bumping the epoch
    /// marks any still-in-flight result as stale.
    pub fn cancel_current_generation(&mut self) {
        if let Some(handle) = self.generation_task.take() {
            handle.abort();
        }
        self.generation_epoch += 1;
        self.is_generating = false;
    }

    /// Resets all state tied to the loaded directory. The cache is
    /// cleared as well; its contents are keyed by absolute path and a
    /// different root means different files.
    pub fn reset_directory_state(&mut self) {
        self.cancel_current_scan();
        self.cancel_current_generation();

        self.root = None;
        self.tree.clear();
        self.selected.clear();
        self.scanned_files.clear();
        self.scanned_entries = Arc::new(Vec::new());
        self.rules = None;
        self.cache.clear();
        self.filter_query.clear();
        self.is_scanning = false;
        self.is_generating = false;
        self.scan_errors.clear();
        self.status = "Ready.".to_string();
        self.last_result = None;
    }
}
