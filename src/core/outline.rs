//! ASCII outline of a scanned directory tree.
//!
//! Pure rendering over the entry list a scan produced: no filesystem
//! access, so the outline always reflects the same snapshot the rest
//! of the aggregation uses.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::scanner::ScanEntry;

/// Hard cap on rendered entries so a pathological scan cannot produce
/// a multi-megabyte outline section.
const MAX_OUTLINE_ENTRIES: usize = 10_000;

/// Renders `entries` as an indented tree rooted at `root`.
///
/// Directories sort before files, both in name order. Entries outside
/// `root` are skipped. Output beyond the entry cap is replaced with a
/// truncation marker.
pub fn render(root: &Path, entries: &[ScanEntry]) -> String {
    render_bounded(root, entries, MAX_OUTLINE_ENTRIES)
}

fn render_bounded(root: &Path, entries: &[ScanEntry], max_entries: usize) -> String {
    // parent relative path -> child name -> is_dir. BTreeMap keeps the
    // outline deterministic regardless of scan order.
    let mut children: BTreeMap<PathBuf, BTreeMap<String, bool>> = BTreeMap::new();
    for entry in entries {
        let Ok(relative) = entry.path.strip_prefix(root) else {
            continue;
        };
        let components: Vec<_> = relative.components().collect();
        let mut parent = PathBuf::new();
        for (i, component) in components.iter().enumerate() {
            let name = component.as_os_str().to_string_lossy().into_owned();
            let is_dir = i + 1 < components.len() || entry.is_dir;
            children
                .entry(parent.clone())
                .or_default()
                .entry(name)
                .or_insert(is_dir);
            parent.push(component);
        }
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{}/\n",
        root.file_name().unwrap_or_default().to_string_lossy()
    ));

    // Explicit worklist, pushed in reverse so pop order is render
    // order. Item: (relative path, name, is_dir, prefix, is_last).
    let mut stack: Vec<(PathBuf, String, bool, String, bool)> = Vec::new();
    push_children(&children, Path::new(""), "", &mut stack);

    let mut rendered = 0usize;
    while let Some((path, name, is_dir, prefix, is_last)) = stack.pop() {
        if rendered >= max_entries {
            tracing::warn!("Outline truncated after {max_entries} entries");
            out.push_str("... (outline truncated)\n");
            break;
        }
        let connector = if is_last { "└── " } else { "├── " };
        let icon = if is_dir { "📁 " } else { "📄 " };
        out.push_str(&format!("{prefix}{connector}{icon}{name}\n"));
        rendered += 1;

        if is_dir {
            let child_prefix = if is_last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            push_children(&children, &path, &child_prefix, &mut stack);
        }
    }
    out
}

fn push_children(
    children: &BTreeMap<PathBuf, BTreeMap<String, bool>>,
    parent: &Path,
    prefix: &str,
    stack: &mut Vec<(PathBuf, String, bool, String, bool)>,
) {
    let Some(named) = children.get(parent) else {
        return;
    };
    let mut ordered: Vec<(&String, bool)> = Vec::with_capacity(named.len());
    ordered.extend(named.iter().filter(|(_, d)| **d).map(|(n, d)| (n, *d)));
    ordered.extend(named.iter().filter(|(_, d)| !**d).map(|(n, d)| (n, *d)));

    for i in (0..ordered.len()).rev() {
        let (name, is_dir) = ordered[i];
        stack.push((
            parent.join(name),
            name.clone(),
            is_dir,
            prefix.to_string(),
            i + 1 == ordered.len(),
        ));
    }
}
