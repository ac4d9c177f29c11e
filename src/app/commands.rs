//! Command handlers, the library's public driving surface.
//!
//! Embedders call these in response to user actions. Each handler
//! mutates the shared [`AppState`] and reports back exclusively
//! through [`UserEvent`]s, so a frontend can stay a thin shell.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::events::UserEvent;
use super::helpers::with_state_and_notify;
use super::proxy::EventProxy;
use super::state::AppState;
use super::tasks::{self, start_scan};
use super::view_model::generate_ui_state;
use crate::config::{settings, AppConfig};
use crate::core::aggregator::preview_file;
use crate::core::tree::TraversalLimits;
use crate::core::ContentCache;

/// Lines shown by a file preview before truncation.
const PREVIEW_LINE_LIMIT: usize = 1500;

/// Sends the current state snapshot; called once by the embedder when
/// its frontend is ready.
pub fn initialize<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    let state_guard = state
        .lock()
        .expect("Mutex was poisoned. This should not happen.");
    let ui_state = generate_ui_state(&state_guard);
    drop(state_guard);
    proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
}

/// Loads a directory from scratch: resets directory state and scans,
/// selecting every text file found.
pub fn load_directory<P: EventProxy>(path: PathBuf, proxy: P, state: Arc<Mutex<AppState>>) {
    start_scan(path, proxy, state, false);
}

/// Re-scans the loaded directory, dropping cached contents so changes
/// on disk become visible. The selection survives, intersected with
/// the files that still exist.
pub fn refresh_directory<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    let root = {
        let state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        state_guard.cache.clear();
        state_guard.root.clone()
    };
    match root {
        Some(root) => start_scan(root, proxy, state, true),
        None => tracing::warn!("Refresh requested with no directory loaded"),
    }
}

/// Unloads the current directory and resets to the initial state.
pub fn clear_directory<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    with_state_and_notify(&state, &proxy, |s| {
        s.reset_directory_state();
        s.config.last_directory = None;
        if let Err(e) = settings::save_config(&s.config, s.settings_override.as_deref()) {
            tracing::warn!("Failed to save config after clearing directory: {e}");
        }
    });
}

/// Cancels the ongoing directory scan.
pub fn cancel_scan<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    with_state_and_notify(&state, &proxy, |s| {
        s.cancel_current_scan();
    });
}

/// Toggles the selection of a single text file.
///
/// Files whose folder has never been expanded have no tree node yet;
/// those are toggled directly against the selected set and the tree
/// picks the flag up when the folder is first listed.
pub fn toggle_file_selection<P: EventProxy>(
    path: PathBuf,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) {
    with_state_and_notify(&state, &proxy, |s| {
        if let Some(id) = s.tree.node_id(&path) {
            if !s.tree.toggle_leaf(id, &mut s.selected) {
                tracing::warn!("Selection toggle on non-text node {}", path.display());
            }
        } else if s.scanned_files.binary_search(&path).is_ok() {
            if !s.selected.remove(&path) {
                s.selected.insert(path);
            }
        } else {
            tracing::warn!("Selection toggle for unknown path {}", path.display());
        }
    });
}

/// Toggles a whole folder: selects the subtree unless everything in it
/// is already selected, populating unlisted folders along the way.
pub fn toggle_directory_selection<P: EventProxy>(
    path: PathBuf,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) {
    tokio::spawn(tasks::cascade_selection_task(path, proxy, state));
}

/// Opens or closes one folder, listing its children on first open.
pub fn toggle_expansion<P: EventProxy>(path: PathBuf, proxy: P, state: Arc<Mutex<AppState>>) {
    let needs_population = {
        let mut state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        let s = &mut *state_guard;
        let Some(id) = s.tree.node_id(&path) else {
            tracing::warn!("Expansion toggle for unknown path {}", path.display());
            return;
        };
        let Some(node) = s.tree.node(id) else {
            return;
        };
        if node.populated {
            let expanded = node.expanded;
            s.tree.set_expanded(id, !expanded);
            false
        } else {
            s.tree.set_expanded(id, true);
            true
        }
    };

    if needs_population {
        tokio::spawn(tasks::populate_folder_task(
            path,
            proxy.clone(),
            Arc::clone(&state),
        ));
    }
    with_state_and_notify(&state, &proxy, |_| {});
}

/// Opens every folder up to `max_depth` levels, or up to a sampled
/// depth when none is given.
pub fn expand_all<P: EventProxy>(
    max_depth: Option<usize>,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) {
    tokio::spawn(tasks::expand_all_task(proxy, state, max_depth));
}

/// Closes every folder. The root level stays visible.
pub fn collapse_all<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    with_state_and_notify(&state, &proxy, |s| {
        let mut budget = TraversalLimits::default().max_nodes;
        s.tree.collapse_all(&mut budget);
    });
}

/// Selects every text file the scan found, listed or not.
pub fn select_all<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    with_state_and_notify(&state, &proxy, |s| {
        s.selected.replace_all(s.scanned_files.iter().cloned());
        s.tree.reset_selection_flags(&s.selected, true);
    });
}

/// Empties the selection.
pub fn deselect_all<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    with_state_and_notify(&state, &proxy, |s| {
        s.selected.clear();
        s.tree.reset_selection_flags(&s.selected, false);
    });
}

/// Sets the tree filter query. An empty query shows everything.
pub fn set_filter<P: EventProxy>(query: String, proxy: P, state: Arc<Mutex<AppState>>) {
    with_state_and_notify(&state, &proxy, |s| {
        s.filter_query = query;
    });
}

/// Loads the head of a file and sends it for preview display.
pub fn load_file_preview<P: EventProxy>(path: PathBuf, proxy: P, state: Arc<Mutex<AppState>>) {
    let config = {
        let state_guard = state
            .lock()
            .expect("Mutex was poisoned. This should not happen.");
        state_guard.config.clone()
    };
    match preview_file(&path, PREVIEW_LINE_LIMIT, &config) {
        Ok(content) => proxy.send_event(UserEvent::ShowFilePreview { content, path }),
        Err(e) => proxy.send_event(UserEvent::ShowError(e.to_string())),
    }
}

/// Renders the current selection into one output string by spawning a
/// generation task. The result arrives as a
/// [`UserEvent::GenerationComplete`].
pub fn generate_output<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    let mut state_guard = state
        .lock()
        .expect("Mutex was poisoned. This should not happen.");
    let s = &mut *state_guard;

    if s.selected.is_empty() {
        s.status = "Nothing selected.".to_string();
        let ui_state = generate_ui_state(s);
        drop(state_guard);
        proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
        return;
    }

    s.cancel_current_generation();
    s.is_generating = true;
    s.status = "Generating...".to_string();

    let generator = tasks::RealContentGenerator {
        cache: Arc::clone(&s.cache),
        tokens: Arc::clone(&s.tokens),
    };

    let ui_state = generate_ui_state(s);
    proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));

    let proxy_clone = proxy.clone();
    let state_clone = Arc::clone(&state);
    let handle = tokio::spawn(async move {
        tasks::generation_task(proxy_clone, state_clone, generator).await;
    });
    s.generation_task = Some(handle);
}

/// Cancels the ongoing generation; its result will be discarded.
pub fn cancel_generation<P: EventProxy>(proxy: P, state: Arc<Mutex<AppState>>) {
    with_state_and_notify(&state, &proxy, |s| {
        s.cancel_current_generation();
        s.status = "Generation cancelled.".to_string();
    });
}

/// Replaces the configuration and persists it.
///
/// Cache bounds take effect immediately through a fresh cache.
/// Exclusion rule changes only affect future scans, so the status nudges
/// towards a re-scan instead of silently applying half of them.
pub fn update_config<P: EventProxy>(
    new_config: AppConfig,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) {
    with_state_and_notify(&state, &proxy, |s| {
        let rules_changed = s.config.ignore_patterns != new_config.ignore_patterns
            || s.config.exclude_node_modules != new_config.exclude_node_modules
            || s.config.exclude_dist != new_config.exclude_dist
            || s.config.exclude_coverage != new_config.exclude_coverage
            || s.config.exclude_virtual_envs != new_config.exclude_virtual_envs
            || s.config.exclude_test_files != new_config.exclude_test_files
            || s.config.extension_overrides != new_config.extension_overrides
            || s.config.excluded_filenames != new_config.excluded_filenames
            || s.config.max_file_size_mb != new_config.max_file_size_mb;
        let cache_changed = s.config.cache_max_entries != new_config.cache_max_entries
            || s.config.cache_max_memory_mb != new_config.cache_max_memory_mb;

        s.config = new_config;
        if let Err(e) = settings::save_config(&s.config, s.settings_override.as_deref()) {
            tracing::warn!("Failed to save updated config: {e}");
        }

        if cache_changed {
            tracing::info!(
                "Replacing content cache: {} entries / {} MB",
                s.config.cache_max_entries,
                s.config.cache_max_memory_mb
            );
            s.cache = Arc::new(ContentCache::new(
                s.config.cache_max_entries,
                s.config.cache_max_memory_bytes(),
            ));
        }
        if rules_changed && s.root.is_some() {
            s.status = "Exclusion rules changed. Re-scan to apply them.".to_string();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregator::SECTION_SEPARATOR;
    use crate::utils::test_helpers::setup_test_logging;
    use std::collections::HashSet;
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;

    use crate::app::view_model::UiState;

    #[derive(Clone)]
    struct TestEventProxy {
        sender: mpsc::UnboundedSender<UserEvent>,
    }

    impl EventProxy for TestEventProxy {
        fn send_event(&self, event: UserEvent) {
            // Dropped receivers are fine: some tests only poll state.
            let _ = self.sender.send(event);
        }
    }

    struct TestHarness {
        state: Arc<Mutex<AppState>>,
        proxy: TestEventProxy,
        event_rx: mpsc::UnboundedReceiver<UserEvent>,
        root_path: PathBuf,
        _temp_dir: TempDir,
    }

    impl TestHarness {
        fn new() -> Self {
            setup_test_logging();
            let temp_dir = tempdir().expect("Failed to create temp dir");
            let root_path = temp_dir.path().join("project");
            fs::create_dir(&root_path).unwrap();
            // The scanner canonicalizes its root; resolve here so paths
            // built by tests compare equal to scanned ones.
            let root_path = root_path.canonicalize().unwrap();
            let (tx, rx) = mpsc::unbounded_channel();

            let mut state = AppState::with_config(Self::clean_test_config());
            state.settings_override = Some(temp_dir.path().join("settings.json"));

            Self {
                state: Arc::new(Mutex::new(state)),
                proxy: TestEventProxy { sender: tx },
                event_rx: rx,
                root_path,
                _temp_dir: temp_dir,
            }
        }

        /// Config without production ignore patterns and without the
        /// outline section, so content assertions stay exact.
        fn clean_test_config() -> AppConfig {
            AppConfig {
                ignore_patterns: HashSet::new(),
                include_outline: false,
                ..AppConfig::default()
            }
        }

        fn create_file(&self, relative: &str, content: &str) -> PathBuf {
            let path = self.root_path.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
            path
        }

        async fn wait_for_scan_completion(&mut self) -> Box<UiState> {
            let deadline = tokio::time::sleep(Duration::from_secs(5));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    event = self.event_rx.recv() => {
                        match event {
                            Some(UserEvent::StateUpdate(ui)) if !ui.is_scanning => return ui,
                            Some(_) => {}
                            None => panic!("Event channel closed during scan"),
                        }
                    }
                    _ = &mut deadline => panic!("Scan did not complete in time"),
                }
            }
        }

        async fn wait_for_generation_complete(
            &mut self,
        ) -> Box<crate::core::AggregationResult> {
            let deadline = tokio::time::sleep(Duration::from_secs(5));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    event = self.event_rx.recv() => {
                        match event {
                            Some(UserEvent::GenerationComplete(result)) => return result,
                            Some(_) => {}
                            None => panic!("Event channel closed during generation"),
                        }
                    }
                    _ = &mut deadline => panic!("Generation did not complete in time"),
                }
            }
        }

        async fn drain_state_updates(&mut self) -> Option<Box<UiState>> {
            let mut last = None;
            let deadline = tokio::time::sleep(Duration::from_millis(400));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    event = self.event_rx.recv() => {
                        match event {
                            Some(UserEvent::StateUpdate(ui)) => last = Some(ui),
                            Some(_) => {}
                            None => break,
                        }
                    }
                    _ = &mut deadline => break,
                }
            }
            last
        }

        /// Polls the shared state until `predicate` holds.
        async fn wait_until<F>(&self, predicate: F)
        where
            F: Fn(&AppState) -> bool,
        {
            for _ in 0..200 {
                {
                    let state_guard = self.state.lock().unwrap();
                    if predicate(&state_guard) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("Condition not reached in time");
        }
    }

    #[tokio::test]
    async fn load_directory_scans_and_selects_all_text_files() {
        let mut harness = TestHarness::new();
        harness.create_file("src/main.rs", "fn main() {}\n");
        harness.create_file("README.md", "# readme\n");
        harness.create_file("logo.png", "\u{0}\u{1}");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );

        let ui = harness.wait_for_scan_completion().await;
        assert_eq!(ui.total_text_files, 2);
        assert_eq!(ui.selected_count, 2);
        assert!(ui.status_message.starts_with("Scan complete"));
        let names: Vec<&str> = ui.tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["src", "logo.png", "README.md"]);
    }

    #[tokio::test]
    async fn toggling_an_unlisted_file_updates_the_selection_set() {
        let mut harness = TestHarness::new();
        let nested = harness.create_file("src/lib.rs", "pub fn lib() {}\n");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        deselect_all(harness.proxy.clone(), harness.state.clone());
        toggle_file_selection(nested.clone(), harness.proxy.clone(), harness.state.clone());

        let ui = harness.drain_state_updates().await.unwrap();
        assert_eq!(ui.selected_count, 1);

        toggle_file_selection(nested, harness.proxy.clone(), harness.state.clone());
        let ui = harness.drain_state_updates().await.unwrap();
        assert_eq!(ui.selected_count, 0);
    }

    #[tokio::test]
    async fn toggle_expansion_populates_a_folder_lazily() {
        let mut harness = TestHarness::new();
        harness.create_file("src/main.rs", "fn main() {}\n");
        harness.create_file("src/nested/deep.rs", "// deep\n");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        let src = harness.root_path.join("src");
        toggle_expansion(src.clone(), harness.proxy.clone(), harness.state.clone());

        harness
            .wait_until(|s| {
                s.tree
                    .node_id(&src)
                    .and_then(|id| s.tree.node(id))
                    .map(|n| n.populated)
                    .unwrap_or(false)
            })
            .await;

        let ui = harness.drain_state_updates().await.unwrap();
        let src_view = ui.tree.iter().find(|n| n.name == "src").unwrap();
        assert!(src_view.is_expanded);
        let child_names: Vec<&str> =
            src_view.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(child_names, vec!["nested", "main.rs"]);
    }

    #[tokio::test]
    async fn directory_toggle_cascades_into_unlisted_subfolders() {
        let mut harness = TestHarness::new();
        harness.create_file("src/a.rs", "a\n");
        harness.create_file("src/nested/b.rs", "b\n");
        harness.create_file("src/nested/deeper/c.rs", "c\n");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        deselect_all(harness.proxy.clone(), harness.state.clone());
        let src = harness.root_path.join("src");
        toggle_directory_selection(src.clone(), harness.proxy.clone(), harness.state.clone());

        harness.wait_until(|s| s.selected.len() == 3).await;

        // A second toggle deselects the fully selected subtree.
        toggle_directory_selection(src, harness.proxy.clone(), harness.state.clone());
        harness.wait_until(|s| s.selected.is_empty()).await;
    }

    #[tokio::test]
    async fn select_all_and_filter_shape_the_view() {
        let mut harness = TestHarness::new();
        harness.create_file("alpha.rs", "a\n");
        harness.create_file("beta.txt", "b\n");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        deselect_all(harness.proxy.clone(), harness.state.clone());
        select_all(harness.proxy.clone(), harness.state.clone());
        set_filter(
            "alpha".to_string(),
            harness.proxy.clone(),
            harness.state.clone(),
        );

        let ui = harness.drain_state_updates().await.unwrap();
        assert_eq!(ui.selected_count, 2);
        let names: Vec<&str> = ui.tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.rs"]);
        assert!(ui.tree[0].is_match);

        set_filter(String::new(), harness.proxy.clone(), harness.state.clone());
        let ui = harness.drain_state_updates().await.unwrap();
        assert_eq!(ui.tree.len(), 2);
    }

    #[tokio::test]
    async fn generate_output_delivers_the_aggregated_content() {
        let mut harness = TestHarness::new();
        harness.create_file("a.txt", "hello");
        harness.create_file("b.py", "print(1)");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        generate_output(harness.proxy.clone(), harness.state.clone());
        let result = harness.wait_for_generation_complete().await;

        let sections: Vec<&str> = result.content.split(SECTION_SEPARATOR).collect();
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("File: a.txt"));
        assert!(sections[1].starts_with("File: b.py"));
        assert!(result.token_count > 0);
        assert!(result.read_errors.is_empty());
        assert!(result.deleted_files.is_empty());

        let ui = harness.drain_state_updates().await.unwrap();
        assert!(!ui.is_generating);
        assert_eq!(ui.token_count, Some(result.token_count));
        assert!(ui.status_message.starts_with("Generated"));
    }

    #[tokio::test]
    async fn generate_with_empty_selection_reports_status() {
        let mut harness = TestHarness::new();
        harness.create_file("a.txt", "hello");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;
        deselect_all(harness.proxy.clone(), harness.state.clone());

        generate_output(harness.proxy.clone(), harness.state.clone());
        let ui = harness.drain_state_updates().await.unwrap();
        assert!(!ui.is_generating);
        assert_eq!(ui.status_message, "Nothing selected.");
    }

    #[tokio::test]
    async fn load_file_preview_sends_content_or_error() {
        let mut harness = TestHarness::new();
        let file = harness.create_file("src/main.rs", "fn main() {}\n");

        load_file_preview(file.clone(), harness.proxy.clone(), harness.state.clone());
        match harness.event_rx.recv().await {
            Some(UserEvent::ShowFilePreview { content, path }) => {
                assert_eq!(path, file);
                assert_eq!(content, "fn main() {}\n");
            }
            other => panic!("Expected preview event, got {other:?}"),
        }

        load_file_preview(
            harness.root_path.join("missing.rs"),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        match harness.event_rx.recv().await {
            Some(UserEvent::ShowError(message)) => {
                assert!(message.contains("missing.rs"));
            }
            other => panic!("Expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_config_replaces_cache_and_nudges_rescan() {
        let mut harness = TestHarness::new();
        harness.create_file("a.txt", "hello");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        let mut new_config = TestHarness::clean_test_config();
        new_config.cache_max_entries = 8;
        new_config.ignore_patterns.insert("*.txt".to_string());
        update_config(new_config, harness.proxy.clone(), harness.state.clone());

        let ui = harness.drain_state_updates().await.unwrap();
        assert_eq!(ui.cache.max_entries, 8);
        assert_eq!(
            ui.status_message,
            "Exclusion rules changed. Re-scan to apply them."
        );
    }

    #[tokio::test]
    async fn collapse_all_keeps_the_root_level_visible() {
        let mut harness = TestHarness::new();
        harness.create_file("src/main.rs", "fn main() {}\n");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        let src = harness.root_path.join("src");
        toggle_expansion(src.clone(), harness.proxy.clone(), harness.state.clone());
        harness
            .wait_until(|s| {
                s.tree
                    .node_id(&src)
                    .and_then(|id| s.tree.node(id))
                    .map(|n| n.populated)
                    .unwrap_or(false)
            })
            .await;

        collapse_all(harness.proxy.clone(), harness.state.clone());
        let ui = harness.drain_state_updates().await.unwrap();
        let src_view = ui.tree.iter().find(|n| n.name == "src").unwrap();
        assert!(!src_view.is_expanded);
        // Children stay populated, only the fold state changes.
        assert!(src_view.is_populated);
    }

    #[tokio::test]
    async fn clear_directory_resets_everything() {
        let mut harness = TestHarness::new();
        harness.create_file("a.txt", "hello");

        load_directory(
            harness.root_path.clone(),
            harness.proxy.clone(),
            harness.state.clone(),
        );
        harness.wait_for_scan_completion().await;

        clear_directory(harness.proxy.clone(), harness.state.clone());
        let ui = harness.drain_state_updates().await.unwrap();
        assert_eq!(ui.current_path, "");
        assert!(ui.tree.is_empty());
        assert_eq!(ui.selected_count, 0);
        assert_eq!(ui.total_text_files, 0);
        assert_eq!(ui.cache.entries, 0);
    }
}
