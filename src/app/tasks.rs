//! Background tasks: scanning, tree population, cascades and content
//! generation.
//!
//! Tasks never hold the state lock across filesystem work. Each one
//! snapshots what it needs under the lock, does its I/O, then re-locks
//! to apply the results. Applications are guarded twice: by the tree
//! revision (a rebuilt tree invalidates pending node ids) and, for
//! aggregation, by the generation epoch (a newer run makes an older
//! result stale).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use super::events::UserEvent;
use super::helpers::with_state_and_notify;
use super::proxy::EventProxy;
use super::state::AppState;
use super::view_model::generate_ui_state;
use crate::config::settings;
use crate::core::tree::{list_children, sample_expand_depth, TraversalLimits};
use crate::core::{
    outline, AggregationEngine, AggregationResult, ContentCache, CoreError, GenerateRequest,
    Progress, Scanner, TokenCounter,
};

/// Prepares the state for a scan of `path` and spawns the scan task.
///
/// With `preserve_selection` the current selection survives the scan
/// and is afterwards intersected with the files that still exist;
/// without it the state is reset and every found text file starts out
/// selected.
pub fn start_scan<P: EventProxy>(
    path: PathBuf,
    proxy: P,
    state: Arc<Mutex<AppState>>,
    preserve_selection: bool,
) {
    tokio::spawn(async move {
        if !path.is_dir() {
            proxy.send_event(UserEvent::ShowError(format!(
                "Not a scannable directory: {}",
                path.display()
            )));
            return;
        }

        let mut state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        let s = &mut *state_guard;
        s.cancel_current_scan();

        if !preserve_selection {
            s.tree.clear();
            s.selected.clear();
            s.scanned_files.clear();
            s.scanned_entries = Arc::new(Vec::new());
            s.rules = None;
            s.filter_query.clear();
            s.last_result = None;
        }

        s.root = Some(path.clone());
        s.scan_errors.clear();
        s.is_scanning = true;
        s.status = "Scanning...".to_string();

        s.config.last_directory = Some(path.clone());
        if let Err(e) = settings::save_config(&s.config, s.settings_override.as_deref()) {
            tracing::warn!("Failed to persist last directory: {e}");
        }

        let cancel_flag = Arc::new(AtomicBool::new(false));
        s.scan_cancel = Arc::clone(&cancel_flag);

        let proxy_clone = proxy.clone();
        let state_clone = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            scan_task(path, proxy_clone, state_clone, cancel_flag, preserve_selection).await;
        });
        s.scan_task = Some(handle);

        let ui_state = generate_ui_state(s);
        drop(state_guard);
        proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
    });
}

/// Runs one scan to completion and applies the outcome.
async fn scan_task<P: EventProxy>(
    path: PathBuf,
    proxy: P,
    state: Arc<Mutex<AppState>>,
    cancel_flag: Arc<AtomicBool>,
    preserve_selection: bool,
) {
    let config = {
        let state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        state_guard.config.clone()
    };

    let scanner = Scanner::new(config.clone());
    let progress_proxy = proxy.clone();
    let scan_result = scanner
        .scan(&path, Arc::clone(&cancel_flag), move |progress| {
            progress_proxy.send_event(UserEvent::ScanProgress(progress));
        })
        .await;

    let outcome = match scan_result {
        Ok(outcome) => outcome,
        Err(CoreError::Cancelled) => {
            let mut state_guard = state
                .lock()
                .expect("Mutex was poisoned. This should not happen.");
            // A cancel issued through the state already reset these
            // fields; this branch covers a bare flag store.
            if state_guard.is_scanning {
                state_guard.is_scanning = false;
                state_guard.scan_task = None;
                state_guard.status = "Scan cancelled.".to_string();
                state_guard.scan_errors = vec!["Scan cancelled by user.".to_string()];
                let ui_state = generate_ui_state(&state_guard);
                drop(state_guard);
                proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
            }
            return;
        }
        Err(e) => {
            tracing::error!("Scan of {} failed: {e}", path.display());
            let mut state_guard = state
                .lock()
                .expect("Mutex was poisoned. This should not happen.");
            if !state_guard.is_scanning {
                return;
            }
            state_guard.is_scanning = false;
            state_guard.scan_task = None;
            state_guard.status = format!("Scan failed: {e}");
            state_guard.scan_errors = vec![format!("Scan failed: {e}")];
            let ui_state = generate_ui_state(&state_guard);
            drop(state_guard);
            proxy.send_event(UserEvent::ShowError(e.to_string()));
            proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
            return;
        }
    };

    // List the root level before taking the lock so the tree shows its
    // first layer in the same update that ends the scan.
    let rules = Arc::new(outcome.rules);
    let root_children = list_children(&outcome.root, &rules, &config);

    let mut state_guard = state
        .lock()
        .expect("Mutex was poisoned. This should not happen.");
    let s = &mut *state_guard;
    if !s.is_scanning || !Arc::ptr_eq(&cancel_flag, &s.scan_cancel) {
        tracing::info!("Discarding results of a superseded scan");
        return;
    }

    s.root = Some(outcome.root.clone());
    s.rules = Some(rules);
    s.scan_errors = outcome.errors;
    s.scanned_files = outcome.text_files;
    s.scanned_entries = Arc::new(outcome.entries);

    if preserve_selection {
        let present: HashSet<PathBuf> = s.scanned_files.iter().cloned().collect();
        s.selected.retain(|p| present.contains(p));
    } else {
        s.selected.replace_all(s.scanned_files.iter().cloned());
    }

    let root_id = s.tree.populate_root(&outcome.root);
    s.tree.apply_expansion(root_id, root_children, &mut s.selected);
    if !preserve_selection {
        // Everything starts selected, so folder toggles must drive
        // towards deselection first.
        s.tree.reset_selection_flags(&s.selected, true);
    }

    s.status = format!("Scan complete. Found {} files.", s.scanned_files.len());
    s.is_scanning = false;
    s.scan_task = None;

    let ui_state = generate_ui_state(s);
    drop(state_guard);
    proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
}

/// Lists one unpopulated folder and attaches its children.
pub async fn populate_folder_task<P: EventProxy>(
    path: PathBuf,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) {
    let (id, dir, rules, config, revision) = {
        let mut state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        let s = &mut *state_guard;
        let Some(id) = s.tree.node_id(&path) else {
            tracing::warn!("Expansion requested for unknown path {}", path.display());
            return;
        };
        let Some(rules) = s.rules.as_ref().map(Arc::clone) else {
            return;
        };
        // None here means the folder is populated or already in flight.
        let Some(dir) = s.tree.begin_expansion(id) else {
            return;
        };
        (id, dir, rules, s.config.clone(), s.tree.revision())
    };

    let children = list_children(&dir, &rules, &config);

    with_state_and_notify(&state, &proxy, |s| {
        if s.tree.revision() != revision {
            tracing::info!("Discarding folder listing for a rebuilt tree");
            return;
        }
        s.tree.apply_expansion(id, children, &mut s.selected);
    });
}

/// Drives a folder selection toggle through the whole subtree,
/// populating not-yet-listed folders level by level.
pub async fn cascade_selection_task<P: EventProxy>(
    path: PathBuf,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) {
    let (target, mut pending, rules, config, revision) = {
        let mut state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        let s = &mut *state_guard;
        let Some(id) = s.tree.node_id(&path) else {
            tracing::warn!("Cascade requested for unknown path {}", path.display());
            return;
        };
        let Some(rules) = s.rules.as_ref().map(Arc::clone) else {
            return;
        };
        let target = s.tree.cascade_target(id);
        let pending = s.tree.begin_cascade(id, target, &mut s.selected);
        let snapshot = (
            target,
            pending,
            rules,
            s.config.clone(),
            s.tree.revision(),
        );
        let ui_state = generate_ui_state(s);
        drop(state_guard);
        proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
        snapshot
    };

    while !pending.is_empty() {
        let listings: Vec<_> = pending
            .iter()
            .map(|(id, dir)| (*id, list_children(dir, &rules, &config)))
            .collect();

        {
            let mut state_guard = state
                .lock()
                .expect("Mutex was poisoned. This should not happen.");
            let s = &mut *state_guard;
            if s.tree.revision() != revision {
                tracing::info!("Abandoning cascade into a rebuilt tree");
                return;
            }
            pending = s.tree.apply_cascade_level(listings, target, &mut s.selected);
        }
        tokio::task::yield_now().await;
    }

    with_state_and_notify(&state, &proxy, |_| {});
}

/// Opens every folder up to `max_depth`, populating as it goes. When
/// no depth is given the configured or sampled directory depth is
/// used. All sweeps share one processed-node budget.
pub async fn expand_all_task<P: EventProxy>(
    proxy: P,
    state: Arc<Mutex<AppState>>,
    max_depth: Option<usize>,
) {
    let (root, rules, config, revision) = {
        let state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        let Some(root) = state_guard.root.clone() else {
            return;
        };
        let Some(rules) = state_guard.rules.as_ref().map(Arc::clone) else {
            return;
        };
        (
            root,
            rules,
            state_guard.config.clone(),
            state_guard.tree.revision(),
        )
    };

    let limits = TraversalLimits::default();
    let depth = max_depth
        .or(config.max_expand_depth)
        .unwrap_or_else(|| sample_expand_depth(&root))
        .min(limits.max_depth);
    let mut budget = limits.max_nodes;

    loop {
        let pending = {
            let mut state_guard = state
                .lock()
                .expect("Mutex was poisoned. This should not happen.");
            if state_guard.tree.revision() != revision {
                tracing::info!("Abandoning expand-all on a rebuilt tree");
                return;
            }
            state_guard.tree.expand_visible(depth, &mut budget)
        };
        if pending.is_empty() {
            break;
        }

        let listings: Vec<_> = pending
            .iter()
            .map(|(id, dir)| (*id, list_children(dir, &rules, &config)))
            .collect();

        {
            let mut state_guard = state
                .lock()
                .expect("Mutex was poisoned. This should not happen.");
            let s = &mut *state_guard;
            if s.tree.revision() != revision {
                tracing::info!("Abandoning expand-all on a rebuilt tree");
                return;
            }
            s.tree.apply_populate_level(listings, &mut s.selected);
        }

        if budget == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }

    with_state_and_notify(&state, &proxy, |_| {});
}

/// Produces an [`AggregationResult`] from a request snapshot. The
/// seam exists so command tests can drive generation without touching
/// the filesystem.
pub trait ContentGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        request: GenerateRequest,
        progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> AggregationResult;
}

/// The production generator: the real engine over the shared cache
/// and token counter.
pub struct RealContentGenerator {
    pub cache: Arc<ContentCache>,
    pub tokens: Arc<TokenCounter>,
}

impl ContentGenerator for RealContentGenerator {
    fn generate(
        &self,
        request: GenerateRequest,
        progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> AggregationResult {
        AggregationEngine::new(&self.cache, &*self.tokens).generate(request, progress)
    }
}

/// Runs one aggregation: snapshots the selection, renders off the
/// runtime threads, and applies the result unless a newer run has
/// started since.
pub async fn generation_task<P: EventProxy, G: ContentGenerator>(
    proxy: P,
    state: Arc<Mutex<AppState>>,
    generator: G,
) {
    let (files, root, format, base_prompt, outline_entries, epoch) = {
        let state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        let Some(root) = state_guard.root.clone() else {
            drop(state_guard);
            proxy.send_event(UserEvent::ShowError(
                "No directory loaded, nothing to generate.".to_string(),
            ));
            return;
        };
        let base_prompt = state_guard.config.base_prompt.trim();
        (
            state_guard.selected.snapshot_sorted(),
            root,
            state_guard.config.output_format,
            (!base_prompt.is_empty()).then(|| base_prompt.to_string()),
            state_guard
                .config
                .include_outline
                .then(|| Arc::clone(&state_guard.scanned_entries)),
            state_guard.generation_epoch,
        )
    };

    let outline = outline_entries.map(|entries| outline::render(&root, &entries));
    let total_files = files.len();
    let request = GenerateRequest {
        files,
        root,
        format,
        base_prompt,
        outline,
        epoch,
    };

    let progress_proxy = proxy.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let progress = move |p: Progress| {
            progress_proxy.send_event(UserEvent::GenerationProgress(p));
        };
        generator.generate(request, &progress)
    })
    .await;

    let result = match joined {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Generation worker failed: {e}");
            AggregationResult {
                content: String::new(),
                token_count: 0,
                read_errors: vec![format!("Generation failed: {e}")],
                deleted_files: Vec::new(),
                epoch,
            }
        }
    };

    let mut state_guard = state
        .lock()
        .expect("Mutex was poisoned. This should not happen.");
    if result.epoch != state_guard.generation_epoch {
        tracing::info!(
            "Discarding stale generation result (epoch {} behind {})",
            result.epoch,
            state_guard.generation_epoch
        );
        return;
    }

    let rendered = total_files
        .saturating_sub(result.deleted_files.len())
        .saturating_sub(result.read_errors.len());
    state_guard.is_generating = false;
    state_guard.generation_task = None;
    state_guard.status = format!(
        "Generated {} tokens from {} files.",
        result.token_count, rendered
    );
    state_guard.last_result = Some(Box::new(result.clone()));

    let ui_state = generate_ui_state(&state_guard);
    drop(state_guard);
    proxy.send_event(UserEvent::GenerationComplete(Box::new(result)));
    proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
}
