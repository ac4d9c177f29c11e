//! Transforms the [`AppState`] into a serializable view model.
//!
//! This is the presentation layer: it flattens the arena tree into a
//! nested structure a frontend can render directly, applies the active
//! filter, and attaches the display-only numbers (counts, cache stats,
//! token count).

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

use super::state::AppState;
use crate::config::AppConfig;
use crate::core::{CacheStats, NodeId, NodeKind, TreeState};

/// A serializable snapshot of the application state for the UI.
#[derive(Serialize, Clone, Debug)]
pub struct UiState {
    pub config: AppConfig,
    /// Display form of the loaded root, empty when none is loaded.
    pub current_path: String,
    pub tree: Vec<TreeNodeView>,
    pub total_text_files: usize,
    pub selected_count: usize,
    pub is_scanning: bool,
    pub is_generating: bool,
    pub status_message: String,
    pub filter_query: String,
    pub cache: CacheStats,
    pub scan_errors: Vec<String>,
    /// Token count of the last completed aggregation, if any.
    pub token_count: Option<usize>,
}

/// A serializable representation of one tree node for the UI.
#[derive(Serialize, Clone, Debug)]
pub struct TreeNodeView {
    pub name: String,
    pub path: PathBuf,
    pub kind: NodeKind,
    /// "none", "partial" or "full".
    pub selection: String,
    pub is_expanded: bool,
    pub is_populated: bool,
    /// Whether the node's own name matches the active filter.
    pub is_match: bool,
    pub children: Vec<TreeNodeView>,
}

/// Creates the complete [`UiState`] from the current [`AppState`].
pub fn generate_ui_state(state: &AppState) -> UiState {
    let query = state.filter_query.trim().to_lowercase();
    let visible = if query.is_empty() {
        None
    } else {
        Some(state.tree.apply_filter(&query))
    };

    let tree = state
        .tree
        .root()
        .and_then(|root| build_node(&state.tree, root, visible.as_ref(), &query))
        .map(|root_view| root_view.children)
        .unwrap_or_default();

    UiState {
        config: state.config.clone(),
        current_path: state
            .root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        tree,
        total_text_files: state.scanned_files.len(),
        selected_count: state.selected.len(),
        is_scanning: state.is_scanning,
        is_generating: state.is_generating,
        status_message: state.status.clone(),
        filter_query: state.filter_query.clone(),
        cache: state.cache.stats(),
        scan_errors: state.scan_errors.clone(),
        token_count: state.last_result.as_ref().map(|r| r.token_count),
    }
}

/// Builds the view of one node and its visible descendants. Returns
/// `None` for placeholders and for nodes outside the filtered set.
fn build_node(
    tree: &TreeState,
    id: NodeId,
    visible: Option<&HashSet<NodeId>>,
    query: &str,
) -> Option<TreeNodeView> {
    let node = tree.node(id)?;
    if node.kind == NodeKind::Placeholder {
        return None;
    }
    if let Some(visible) = visible {
        if !visible.contains(&id) {
            return None;
        }
    }

    let children = node
        .children
        .iter()
        .filter_map(|&child| build_node(tree, child, visible, query))
        .collect();

    Some(TreeNodeView {
        name: node.name.clone(),
        path: node.path.clone(),
        kind: node.kind,
        selection: tree.selection_state(id).to_string(),
        is_expanded: node.expanded,
        is_populated: node.populated,
        is_match: !query.is_empty() && node.name.to_lowercase().contains(query),
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SelectedFileSet;
    use std::fs;
    use tempfile::TempDir;

    fn populated_state(dir: &TempDir) -> AppState {
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("notes.txt"), "notes").unwrap();

        let config = AppConfig::default();
        let rules = crate::core::IgnoreRules::build(dir.path(), &config);
        let mut state = AppState::with_config(config);
        state.root = Some(dir.path().to_path_buf());
        let root = state.tree.populate_root(dir.path());

        let mut selected = SelectedFileSet::new();
        let children = crate::core::tree::list_children(dir.path(), &rules, &state.config);
        state.tree.apply_expansion(root, children, &mut selected);
        state
    }

    #[test]
    fn ui_state_carries_tree_without_placeholders() {
        let dir = TempDir::new().unwrap();
        let state = populated_state(&dir);

        let ui = generate_ui_state(&state);
        assert_eq!(ui.current_path, dir.path().display().to_string());
        let names: Vec<&str> = ui.tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["src", "notes.txt"]);
        // The unpopulated folder keeps its placeholder internally but
        // the view never shows it.
        assert!(ui.tree[0].children.is_empty());
        assert!(!ui.tree[0].is_populated);
        assert_eq!(ui.tree[1].selection, "none");
    }

    #[test]
    fn filter_narrows_the_view_and_marks_matches() {
        let dir = TempDir::new().unwrap();
        let mut state = populated_state(&dir);
        state.filter_query = "notes".to_string();

        let ui = generate_ui_state(&state);
        let names: Vec<&str> = ui.tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["notes.txt"]);
        assert!(ui.tree[0].is_match);
    }

    #[test]
    fn ui_state_serializes_to_json() {
        let dir = TempDir::new().unwrap();
        let state = populated_state(&dir);

        let json = serde_json::to_value(generate_ui_state(&state)).unwrap();
        assert_eq!(json["selected_count"], 0);
        assert_eq!(json["tree"][0]["kind"], "folder");
        assert!(json["cache"]["max_entries"].as_u64().unwrap() > 0);
    }
}
