//! Arena-backed selection tree over the scanned repository.
//!
//! Nodes live in a flat `Vec` addressed by [`NodeId`]; parent and child
//! links are ids, never references, so every traversal is an iterative
//! worklist. Folders start unpopulated with a single placeholder child
//! and get their real children attached on demand.
//!
//! Population needs directory listings, which are I/O. To keep the
//! state lock free of I/O, mutating operations are split into phases:
//! a `begin_*` call under the lock hands back the paths that need
//! listing, the caller runs [`list_children`] without any lock, and an
//! `apply_*` call attaches the results. The `expansion_in_progress` set
//! makes re-entrant calls on a node that is already mid-flight no-ops,
//! and [`TreeState::revision`] lets callers detect that the tree was
//! rebuilt between phases.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::core::ignore::IgnoreRules;
use crate::core::SelectedFileSet;
use crate::utils::file_detection;

/// Processed-node cap for tree-wide walks. When a walk hits this it
/// stops and logs instead of spinning on a pathological hierarchy.
const MAX_TRAVERSAL_NODES: usize = 50_000;

/// Hard ceiling for expand-all depth, sampled estimate or not.
const MAX_EXPAND_DEPTH: usize = 32;

/// How many directory entries the depth sampler looks at.
const DEPTH_SAMPLE_ENTRIES: usize = 512;

/// Levels added on top of the sampled depth.
const DEPTH_SAMPLE_MARGIN: usize = 2;

/// Handle into the tree arena. Ids stay valid while the revision they
/// were issued under is current; `populate_root` starts a new revision
/// and invalidates all earlier ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    TextFile,
    NonTextFile,
    /// Dummy child of an unpopulated folder, replaced on population.
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
    /// Distance from the root node, root is zero.
    pub depth: usize,
    /// For text files: mirrored into the shared selection set. For
    /// folders: the value the last cascade applied, used only as the
    /// baseline for children that appear later.
    pub selected: bool,
    pub populated: bool,
    pub expanded: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// One directory entry from a listing, ready to become a node.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
}

/// Caps shared by tree-wide walks. Defaults suit production; tests
/// shrink them to exercise the guard paths.
#[derive(Debug, Clone, Copy)]
pub struct TraversalLimits {
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_nodes: MAX_TRAVERSAL_NODES,
            max_depth: MAX_EXPAND_DEPTH,
        }
    }
}

#[derive(Default)]
pub struct TreeState {
    arena: Vec<TreeNode>,
    root: Option<NodeId>,
    index: HashMap<PathBuf, NodeId>,
    expansion_in_progress: HashSet<NodeId>,
    revision: u64,
}

impl TreeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the tree to a single unpopulated root for `repo_path`,
    /// starting a new revision.
    pub fn populate_root(&mut self, repo_path: &Path) -> NodeId {
        self.arena.clear();
        self.index.clear();
        self.expansion_in_progress.clear();
        self.revision += 1;

        let name = repo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| repo_path.display().to_string());
        let root = self.push_node(TreeNode {
            path: repo_path.to_path_buf(),
            name,
            kind: NodeKind::Folder,
            depth: 0,
            selected: false,
            populated: false,
            expanded: true,
            parent: None,
            children: Vec::new(),
        });
        self.attach_placeholder(root);
        self.root = Some(root);
        root
    }

    /// Empties the tree entirely, starting a new revision so in-flight
    /// listings against the old nodes are dropped on arrival.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.index.clear();
        self.expansion_in_progress.clear();
        self.root = None;
        self.revision += 1;
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Bumped on every `populate_root`. Pumped operations compare this
    /// between phases and drop their work when it changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.arena.get(id.0)
    }

    pub fn node_id(&self, path: &Path) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    fn push_node(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.arena.len());
        if !matches!(node.kind, NodeKind::Placeholder) {
            self.index.insert(node.path.clone(), id);
        }
        self.arena.push(node);
        id
    }

    fn attach_placeholder(&mut self, parent: NodeId) {
        let (path, depth) = {
            let node = &self.arena[parent.0];
            (node.path.clone(), node.depth)
        };
        let placeholder = self.push_node(TreeNode {
            path,
            name: "...".to_string(),
            kind: NodeKind::Placeholder,
            depth: depth + 1,
            selected: false,
            populated: false,
            expanded: false,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.arena[parent.0].children.push(placeholder);
    }

    fn detach_placeholder(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.arena[id.0].children);
        for child in children {
            if matches!(self.arena[child.0].kind, NodeKind::Placeholder) {
                self.arena[child.0].parent = None;
            } else {
                self.arena[id.0].children.push(child);
            }
        }
    }

    /// First phase of expanding one folder: marks it in flight and
    /// returns the path to list outside the lock. `None` when the node
    /// is not an unpopulated folder or an expansion is already running
    /// for it.
    pub fn begin_expansion(&mut self, id: NodeId) -> Option<PathBuf> {
        let (eligible, path) = match self.arena.get(id.0) {
            Some(node) => (
                matches!(node.kind, NodeKind::Folder) && !node.populated,
                node.path.clone(),
            ),
            None => return None,
        };
        if !eligible {
            return None;
        }
        if !self.expansion_in_progress.insert(id) {
            tracing::debug!("Expansion already in flight for {}", path.display());
            return None;
        }
        Some(path)
    }

    /// Second phase: attaches the listed children, replacing the
    /// placeholder. Text file children take their selection flag from
    /// the shared set, so selections seeded by a scan materialize
    /// correctly when their folder is first opened.
    pub fn apply_expansion(
        &mut self,
        id: NodeId,
        children: Vec<ChildSpec>,
        selected: &mut SelectedFileSet,
    ) {
        self.expansion_in_progress.remove(&id);
        let (eligible, depth) = match self.arena.get(id.0) {
            Some(node) => (
                matches!(node.kind, NodeKind::Folder) && !node.populated,
                node.depth + 1,
            ),
            None => return,
        };
        if !eligible {
            return;
        }

        self.detach_placeholder(id);
        let mut ids = Vec::with_capacity(children.len());
        for spec in children {
            let kind = spec.kind;
            let is_selected = matches!(kind, NodeKind::TextFile) && selected.contains(&spec.path);
            let child = self.push_node(TreeNode {
                path: spec.path,
                name: spec.name,
                kind,
                depth,
                selected: is_selected,
                populated: !matches!(kind, NodeKind::Folder),
                expanded: false,
                parent: Some(id),
                children: Vec::new(),
            });
            if matches!(kind, NodeKind::Folder) {
                self.attach_placeholder(child);
            }
            ids.push(child);
        }
        self.arena[id.0].children = ids;
        self.arena[id.0].populated = true;
    }

    /// Flips one text file leaf and mirrors the change into the shared
    /// set. Folders and non-text files are left alone.
    pub fn toggle_leaf(&mut self, id: NodeId, selected: &mut SelectedFileSet) -> bool {
        let Some(node) = self.arena.get_mut(id.0) else {
            return false;
        };
        if !matches!(node.kind, NodeKind::TextFile) {
            return false;
        }
        node.selected = !node.selected;
        if node.selected {
            selected.insert(node.path.clone());
        } else {
            selected.remove(&node.path);
        }
        true
    }

    /// The state a folder toggle drives its subtree towards: deselect
    /// when every populated text leaf below is already selected,
    /// otherwise select.
    pub fn cascade_target(&self, id: NodeId) -> bool {
        let (total, picked) = self.subtree_leaf_counts(id);
        if total == 0 {
            return !self.node(id).map(|n| n.selected).unwrap_or(false);
        }
        picked < total
    }

    /// First phase of a folder toggle: applies `target` to everything
    /// already populated below `id` and returns the unpopulated folders
    /// that still need listing, marked in flight.
    pub fn begin_cascade(
        &mut self,
        id: NodeId,
        target: bool,
        selected: &mut SelectedFileSet,
    ) -> Vec<(NodeId, PathBuf)> {
        let mut pending = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.arena.get_mut(current.0) else {
                continue;
            };
            match node.kind {
                NodeKind::TextFile => {
                    node.selected = target;
                    if target {
                        selected.insert(node.path.clone());
                    } else {
                        selected.remove(&node.path);
                    }
                }
                NodeKind::Folder => {
                    node.selected = target;
                    if node.populated {
                        stack.extend(node.children.iter().copied());
                    } else {
                        pending.push((current, node.path.clone()));
                    }
                }
                NodeKind::NonTextFile | NodeKind::Placeholder => {}
            }
        }
        pending.retain(|(node_id, _)| self.expansion_in_progress.insert(*node_id));
        pending
    }

    /// Second phase of a folder toggle: attaches listings with every
    /// text file forced to `target` and returns the next layer of
    /// unpopulated folders. Called repeatedly until nothing is pending.
    pub fn apply_cascade_level(
        &mut self,
        listings: Vec<(NodeId, Vec<ChildSpec>)>,
        target: bool,
        selected: &mut SelectedFileSet,
    ) -> Vec<(NodeId, PathBuf)> {
        let mut next = Vec::new();
        for (id, children) in listings {
            self.expansion_in_progress.remove(&id);
            let (eligible, depth) = match self.arena.get(id.0) {
                Some(node) => (
                    matches!(node.kind, NodeKind::Folder) && !node.populated,
                    node.depth + 1,
                ),
                None => continue,
            };
            if !eligible {
                continue;
            }

            self.detach_placeholder(id);
            let mut ids = Vec::with_capacity(children.len());
            for spec in children {
                let kind = spec.kind;
                let is_selected = match kind {
                    NodeKind::TextFile => {
                        if target {
                            selected.insert(spec.path.clone());
                        } else {
                            selected.remove(&spec.path);
                        }
                        target
                    }
                    NodeKind::Folder => target,
                    _ => false,
                };
                let child = self.push_node(TreeNode {
                    path: spec.path,
                    name: spec.name,
                    kind,
                    depth,
                    selected: is_selected,
                    populated: !matches!(kind, NodeKind::Folder),
                    expanded: false,
                    parent: Some(id),
                    children: Vec::new(),
                });
                if matches!(kind, NodeKind::Folder) {
                    self.attach_placeholder(child);
                    let path = self.arena[child.0].path.clone();
                    next.push((child, path));
                }
                ids.push(child);
            }
            self.arena[id.0].children = ids;
            self.arena[id.0].populated = true;
        }
        next.retain(|(node_id, _)| self.expansion_in_progress.insert(*node_id));
        next
    }

    /// Marks one folder open or closed without populating anything.
    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> bool {
        match self.arena.get_mut(id.0) {
            Some(node) if matches!(node.kind, NodeKind::Folder) => {
                node.expanded = expanded;
                true
            }
            _ => false,
        }
    }

    /// Sweep phase of expand-all: opens every populated folder above
    /// `max_depth` and collects the unpopulated ones for listing.
    /// `budget` carries the processed-node cap across sweeps; on
    /// exhaustion the sweep stops and logs.
    pub fn expand_visible(&mut self, max_depth: usize, budget: &mut usize) -> Vec<(NodeId, PathBuf)> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        let mut queue = VecDeque::from([root]);
        let mut capped = false;
        while let Some(current) = queue.pop_front() {
            if *budget == 0 {
                capped = true;
                break;
            }
            *budget -= 1;

            let (populated, path, children) = {
                let Some(node) = self.arena.get_mut(current.0) else {
                    continue;
                };
                if !matches!(node.kind, NodeKind::Folder) || node.depth >= max_depth {
                    continue;
                }
                node.expanded = true;
                (node.populated, node.path.clone(), node.children.clone())
            };

            if populated {
                for child in children {
                    if matches!(
                        self.arena.get(child.0).map(|n| n.kind),
                        Some(NodeKind::Folder)
                    ) {
                        queue.push_back(child);
                    }
                }
            } else {
                pending.push((current, path));
            }
        }
        if capped {
            tracing::warn!("Traversal cap hit during expand-all, tree left partially expanded");
        }
        pending.retain(|(node_id, _)| self.expansion_in_progress.insert(*node_id));
        pending
    }

    /// Attaches listings produced for an expand-all sweep. Unlike a
    /// cascade this does not change any selection, so children are
    /// reconciled against the shared set like a plain expansion.
    pub fn apply_populate_level(
        &mut self,
        listings: Vec<(NodeId, Vec<ChildSpec>)>,
        selected: &mut SelectedFileSet,
    ) {
        for (id, children) in listings {
            self.apply_expansion(id, children, selected);
        }
    }

    /// Closes every folder below the root. The root itself stays open
    /// so the first level remains visible.
    pub fn collapse_all(&mut self, budget: &mut usize) {
        let Some(root) = self.root else {
            return;
        };
        let mut queue: VecDeque<NodeId> = self
            .arena
            .get(root.0)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default();
        let mut capped = false;
        while let Some(current) = queue.pop_front() {
            if *budget == 0 {
                capped = true;
                break;
            }
            *budget -= 1;
            if let Some(node) = self.arena.get_mut(current.0) {
                if matches!(node.kind, NodeKind::Folder) {
                    node.expanded = false;
                    queue.extend(node.children.iter().copied());
                }
            }
        }
        if capped {
            tracing::warn!("Traversal cap hit during collapse-all");
        }
    }

    /// Computes the visible node set for `query`: nodes whose name
    /// contains it case-insensitively, plus their ancestor chains so
    /// every match stays reachable. Never mutates selection. An empty
    /// query makes everything visible.
    pub fn apply_filter(&self, query: &str) -> HashSet<NodeId> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return (0..self.arena.len()).map(NodeId).collect();
        }

        let matched: Vec<usize> = self
            .arena
            .par_iter()
            .enumerate()
            .filter(|(_, node)| {
                !matches!(node.kind, NodeKind::Placeholder)
                    && node.name.to_lowercase().contains(&needle)
            })
            .map(|(index, _)| index)
            .collect();

        let mut visible = HashSet::new();
        for index in matched {
            let mut current = Some(NodeId(index));
            while let Some(id) = current {
                if !visible.insert(id) {
                    break;
                }
                current = self.arena.get(id.0).and_then(|n| n.parent);
            }
        }
        visible
    }

    /// Derived tri-state for a checkbox: `"none"`, `"partial"` or
    /// `"full"`. For folders this rolls up the populated text leaves
    /// underneath; a folder with nothing populated reports the value
    /// the last cascade left on it.
    pub fn selection_state(&self, id: NodeId) -> &'static str {
        let Some(node) = self.node(id) else {
            return "none";
        };
        match node.kind {
            NodeKind::TextFile => {
                if node.selected {
                    "full"
                } else {
                    "none"
                }
            }
            NodeKind::Folder => {
                let (total, picked) = self.subtree_leaf_counts(id);
                if total == 0 {
                    if node.selected {
                        "full"
                    } else {
                        "none"
                    }
                } else if picked == 0 {
                    "none"
                } else if picked == total {
                    "full"
                } else {
                    "partial"
                }
            }
            NodeKind::NonTextFile | NodeKind::Placeholder => "none",
        }
    }

    /// Rewrites every populated node's flag from the shared set, with
    /// `folder_baseline` left on folders. Backs select-all and
    /// deselect-all.
    pub fn reset_selection_flags(&mut self, selected: &SelectedFileSet, folder_baseline: bool) {
        for node in &mut self.arena {
            match node.kind {
                NodeKind::TextFile => node.selected = selected.contains(&node.path),
                NodeKind::Folder => node.selected = folder_baseline,
                NodeKind::NonTextFile | NodeKind::Placeholder => {}
            }
        }
    }

    fn subtree_leaf_counts(&self, id: NodeId) -> (usize, usize) {
        let mut total = 0;
        let mut picked = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.arena.get(current.0) else {
                continue;
            };
            match node.kind {
                NodeKind::TextFile => {
                    total += 1;
                    if node.selected {
                        picked += 1;
                    }
                }
                NodeKind::Folder => stack.extend(node.children.iter().copied()),
                NodeKind::NonTextFile | NodeKind::Placeholder => {}
            }
        }
        (total, picked)
    }
}

/// Lists the immediate children of `dir`, filtered through the ignore
/// rules and classified. Folders sort before files, then by name, so
/// sibling order is deterministic. Listing failures log and yield an
/// empty set; expansion must never take the application down.
pub fn list_children(dir: &Path, rules: &IgnoreRules, config: &AppConfig) -> Vec<ChildSpec> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) => {
            tracing::warn!("Could not list {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut children = Vec::new();
    for entry in read_dir.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if rules.is_ignored(&path, is_dir) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let kind = if is_dir {
            NodeKind::Folder
        } else if file_detection::is_text_file(&path, config) {
            NodeKind::TextFile
        } else {
            NodeKind::NonTextFile
        };
        children.push(ChildSpec { path, name, kind });
    }

    children.sort_by(|a, b| {
        let a_dir = matches!(a.kind, NodeKind::Folder);
        let b_dir = matches!(b.kind, NodeKind::Folder);
        b_dir
            .cmp(&a_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
    children
}

/// Estimates a sensible expand-all depth by sampling a bounded number
/// of real directory entries and adding a margin, capped by the
/// absolute maximum.
pub fn sample_expand_depth(root: &Path) -> usize {
    let mut deepest = 1;
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .flatten()
        .take(DEPTH_SAMPLE_ENTRIES)
    {
        deepest = deepest.max(entry.depth());
    }
    (deepest + DEPTH_SAMPLE_MARGIN).min(MAX_EXPAND_DEPTH)
}
