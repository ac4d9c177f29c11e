//! Asynchronous directory scanner.
//!
//! Walks a root directory with [`walkdir`], prunes ignored subtrees
//! before descending into them, and classifies every surviving file as
//! text or non-text. The scan is cancellable between entries and
//! reports progress at a bounded rate so callers can drive a UI
//! without being flooded.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::core::error::CoreError;
use crate::core::ignore::IgnoreRules;
use crate::core::Progress;
use crate::utils::file_detection;

/// One progress callback per this many processed entries.
const PROGRESS_UPDATE_INTERVAL: usize = 25;

/// Yield back to the runtime after this many processed entries so a
/// large walk cannot starve other tasks on the worker thread.
const YIELD_INTERVAL: usize = 200;

/// A filesystem entry that survived the ignore rules.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Everything a completed scan hands back to the application layer.
pub struct ScanOutcome {
    /// Canonicalized scan root. All entry paths start with this.
    pub root: PathBuf,
    /// Rules compiled for this root, kept for later tree population.
    pub rules: IgnoreRules,
    /// Every surviving entry, files and directories alike.
    pub entries: Vec<ScanEntry>,
    /// Sorted aggregation candidates: the entries classified as text.
    pub text_files: Vec<PathBuf>,
    /// Per-entry diagnostics that did not stop the scan.
    pub errors: Vec<String>,
}

/// Walks directories using the exclusion rules derived from one
/// [`AppConfig`] snapshot.
pub struct Scanner {
    config: AppConfig,
}

impl Scanner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Scans `root` recursively.
    ///
    /// Ignored directories are pruned from the walk, so their contents
    /// are never opened. The cancellation flag is polled between
    /// entries; a cancelled scan returns [`CoreError::Cancelled`] and
    /// the caller discards the partial results. Entry-level failures
    /// (unreadable subdirectories, permission problems) are collected
    /// as diagnostics instead of aborting the walk.
    pub async fn scan(
        &self,
        root: &Path,
        cancel_flag: Arc<AtomicBool>,
        progress: impl Fn(Progress),
    ) -> Result<ScanOutcome, CoreError> {
        let root = self.validate_root(root)?;
        let rules = IgnoreRules::build(&root, &self.config);
        let started = Instant::now();

        let mut entries = Vec::new();
        let mut text_files = Vec::new();
        let mut errors = Vec::new();
        let mut processed = 0usize;

        let walker = WalkDir::new(&root).follow_links(false).into_iter();
        // The root itself must survive the filter or nothing is walked.
        let filtered = walker.filter_entry(|entry| {
            entry.depth() == 0 || !rules.is_ignored(entry.path(), entry.file_type().is_dir())
        });

        for result in filtered {
            if cancel_flag.load(Ordering::Relaxed) {
                tracing::info!(
                    "Scan of {} cancelled after {} entries",
                    root.display(),
                    processed
                );
                return Err(CoreError::Cancelled);
            }

            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(format!("Scan error: {e}"));
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            processed += 1;
            let path = entry.path().to_path_buf();
            let is_dir = entry.file_type().is_dir();
            if entry.file_type().is_file() && file_detection::is_text_file(&path, &self.config) {
                text_files.push(path.clone());
            }
            entries.push(ScanEntry { path, is_dir });

            if processed % PROGRESS_UPDATE_INTERVAL == 0 {
                progress(Progress {
                    processed,
                    total: 0,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                });
            }
            if processed % YIELD_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }
        }

        text_files.sort();
        progress(Progress {
            processed,
            total: processed,
            elapsed_secs: started.elapsed().as_secs_f64(),
        });
        tracing::info!(
            "Scan of {} complete: {} entries, {} text files, {} diagnostics",
            root.display(),
            entries.len(),
            text_files.len(),
            errors.len()
        );

        Ok(ScanOutcome {
            root,
            rules,
            entries,
            text_files,
            errors,
        })
    }

    /// Canonicalizes and checks the scan target before any directory
    /// is opened. When an allowed root is configured, targets outside
    /// it are rejected outright.
    fn validate_root(&self, root: &Path) -> Result<PathBuf, CoreError> {
        let canonical = root
            .canonicalize()
            .map_err(|e| CoreError::from_io(e, root))?;
        if !canonical.is_dir() {
            return Err(CoreError::NotADirectory(canonical));
        }
        if let Some(allowed) = &self.config.allowed_scan_root {
            let allowed = allowed
                .canonicalize()
                .map_err(|e| CoreError::from_io(e, allowed))?;
            if !canonical.starts_with(&allowed) {
                tracing::warn!(
                    "Rejected scan of {} outside allowed root {}",
                    canonical.display(),
                    allowed.display()
                );
                return Err(CoreError::OutsideAllowedRoot {
                    path: canonical,
                    allowed,
                });
            }
        }
        Ok(canonical)
    }
}
