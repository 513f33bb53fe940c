//! The in-memory namespace tree.
//!
//! A single reader/writer lock guards the whole tree: mutations take the
//! exclusive lock, reads (including deep-copy listings) take the shared
//! lock. `parking_lot`'s eventual-fairness keeps writers from starving
//! under read-heavy load.

use parking_lot::RwLock;
use ridgefs_common::{AttrMap, path_partition, path_segments};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a namespace node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

/// One path segment in the namespace: a file or a directory.
///
/// Children are keyed by name, so sibling names are unique by
/// construction. File nodes never carry children. Full paths are
/// computed by traversal; there are no parent back-pointers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamespaceNode {
    pub name: String,
    pub kind: NodeKind,
    pub attributes: AttrMap,
    pub children: BTreeMap<String, NamespaceNode>,
}

impl NamespaceNode {
    #[must_use]
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Directory,
            attributes: AttrMap::new(),
            children: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn file(name: impl Into<String>, attributes: AttrMap) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            attributes,
            children: BTreeMap::new(),
        }
    }

    /// The root node: a directory with an empty name.
    #[must_use]
    pub fn root() -> Self {
        Self::directory("")
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Deep copy down to `depth` levels of children. Depth 0 copies the
    /// node itself with no children.
    #[must_use]
    fn copy_to_depth(&self, depth: usize) -> Self {
        let children = if depth == 0 || self.is_file() {
            BTreeMap::new()
        } else {
            self.children
                .iter()
                .map(|(name, child)| (name.clone(), child.copy_to_depth(depth - 1)))
                .collect()
        };
        Self {
            name: self.name.clone(),
            kind: self.kind,
            attributes: self.attributes.clone(),
            children,
        }
    }
}

/// Outcome of the recursive delete walk.
enum DeleteOutcome {
    NotFound,
    NotEmpty,
    /// The child was removed; `collapse` asks the caller to also remove
    /// this directory if it became empty.
    Deleted {
        collapse: bool,
    },
}

/// The namespace tree with its single reader/writer lock.
pub struct NamespaceTree {
    root: RwLock<NamespaceNode>,
}

impl NamespaceTree {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(NamespaceNode::root()),
        }
    }

    /// Create `path` and all missing intermediate directories, merging
    /// `attrs` into the final directory. Idempotent for directories that
    /// already exist. Fails only if a component of the path is an
    /// existing file; nothing is created in that case.
    pub fn mkdir(&self, path: &str, attrs: &AttrMap) -> bool {
        let segments = path_segments(path);
        let mut root = self.root.write();

        // Verify no file sits anywhere along the path before creating
        // anything, so a failed mkdir has no side effects.
        {
            let mut cursor = &*root;
            for seg in &segments {
                match cursor.children.get(*seg) {
                    Some(child) if child.is_file() => return false,
                    Some(child) => cursor = child,
                    None => break,
                }
            }
        }

        let mut cursor = &mut *root;
        for seg in &segments {
            cursor = cursor
                .children
                .entry((*seg).to_string())
                .or_insert_with(|| NamespaceNode::directory(*seg));
        }
        for (k, v) in attrs {
            cursor.attributes.insert(k.clone(), v.clone());
        }
        true
    }

    /// Insert a file node at `path`, auto-creating the parent directory
    /// chain. Returns false if any node already exists at that exact
    /// path, or if a component of the parent chain is a file.
    pub fn create_file(&self, path: &str, attrs: &AttrMap) -> bool {
        let segments = path_segments(path);
        let Some((file_name, parents)) = segments.split_last() else {
            return false;
        };
        let mut root = self.root.write();

        {
            let mut cursor = &*root;
            for seg in parents {
                match cursor.children.get(*seg) {
                    Some(child) if child.is_file() => return false,
                    Some(child) => cursor = child,
                    None => break,
                }
            }
        }

        let mut cursor = &mut *root;
        for seg in parents {
            cursor = cursor
                .children
                .entry((*seg).to_string())
                .or_insert_with(|| NamespaceNode::directory(*seg));
        }
        if cursor.children.contains_key(*file_name) {
            return false;
        }
        cursor.children.insert(
            (*file_name).to_string(),
            NamespaceNode::file(*file_name, attrs.clone()),
        );
        true
    }

    /// Remove the node at `path`. Fails (false, no side effects) for
    /// missing paths and for directories that still have children. On
    /// success, now-childless ancestor directories are removed walking
    /// upward, stopping at the first still-populated ancestor or the
    /// root.
    pub fn delete(&self, path: &str) -> bool {
        let segments = path_segments(path);
        if segments.is_empty() {
            // The root itself is never deletable.
            return false;
        }
        let mut root = self.root.write();
        match Self::delete_walk(&mut root, &segments) {
            DeleteOutcome::Deleted { .. } => true,
            DeleteOutcome::NotFound | DeleteOutcome::NotEmpty => false,
        }
    }

    fn delete_walk(node: &mut NamespaceNode, segments: &[&str]) -> DeleteOutcome {
        let (head, rest) = match segments.split_first() {
            Some(split) => split,
            None => return DeleteOutcome::NotFound,
        };

        if rest.is_empty() {
            match node.children.get(*head) {
                None => return DeleteOutcome::NotFound,
                Some(target) if target.is_directory() && !target.children.is_empty() => {
                    return DeleteOutcome::NotEmpty;
                }
                Some(_) => {}
            }
            node.children.remove(*head);
            return DeleteOutcome::Deleted {
                collapse: node.children.is_empty(),
            };
        }

        let Some(child) = node.children.get_mut(*head) else {
            return DeleteOutcome::NotFound;
        };
        match Self::delete_walk(child, rest) {
            DeleteOutcome::Deleted { collapse: true } => {
                node.children.remove(*head);
                DeleteOutcome::Deleted {
                    collapse: node.children.is_empty(),
                }
            }
            other => other,
        }
    }

    /// Depth-bounded deep copy of the subtree at `path`, taken under the
    /// shared lock so callers never observe (or mutate) live state.
    #[must_use]
    pub fn list_files(&self, path: &str, depth: usize) -> Option<NamespaceNode> {
        let segments = path_segments(path);
        let root = self.root.read();
        let mut cursor = &*root;
        for seg in &segments {
            cursor = cursor.children.get(*seg)?;
        }
        Some(cursor.copy_to_depth(depth))
    }

    /// Full paths of every file whose hashed path falls into `partition`
    /// (of `partition_count` total). Whole-tree walk under the shared
    /// lock.
    #[must_use]
    pub fn find_files_by_partition(&self, partition: u64, partition_count: u64) -> Vec<String> {
        let root = self.root.read();
        let mut out = Vec::new();
        Self::collect_partition_files(&root, "", partition, partition_count, &mut out);
        out
    }

    fn collect_partition_files(
        node: &NamespaceNode,
        prefix: &str,
        partition: u64,
        partition_count: u64,
        out: &mut Vec<String>,
    ) {
        for (name, child) in &node.children {
            let full_path = format!("{prefix}/{name}");
            if child.is_file() {
                if path_partition(&full_path, partition_count) == partition {
                    out.push(full_path);
                }
            } else {
                Self::collect_partition_files(child, &full_path, partition, partition_count, out);
            }
        }
    }

    /// Deep copy of the entire tree (checkpoint input).
    #[must_use]
    pub fn snapshot_root(&self) -> NamespaceNode {
        self.root.read().clone()
    }

    /// Atomically swap in a freshly deserialized root (fsimage load).
    pub fn replace_root(&self, new_root: NamespaceNode) {
        *self.root.write() = new_root;
    }

    /// Number of file nodes in the whole tree.
    #[must_use]
    pub fn file_count(&self) -> usize {
        fn count(node: &NamespaceNode) -> usize {
            node.children
                .values()
                .map(|c| if c.is_file() { 1 } else { count(c) })
                .sum()
        }
        count(&self.root.read())
    }

    /// True if a node (file or directory) exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        let segments = path_segments(path);
        let root = self.root.read();
        let mut cursor = &*root;
        for seg in &segments {
            match cursor.children.get(*seg) {
                Some(child) => cursor = child,
                None => return false,
            }
        }
        true
    }
}

impl Default for NamespaceTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_mkdir_creates_intermediates() {
        let tree = NamespaceTree::new();
        assert!(tree.mkdir("/a/b/c", &attrs(&[("owner", "root")])));
        assert!(tree.exists("/a"));
        assert!(tree.exists("/a/b"));
        let c = tree.list_files("/a/b/c", 0).unwrap();
        assert!(c.is_directory());
        assert_eq!(c.attributes.get("owner").unwrap(), "root");
    }

    #[test]
    fn test_mkdir_idempotent_merges_attrs() {
        let tree = NamespaceTree::new();
        assert!(tree.mkdir("/a", &attrs(&[("x", "1")])));
        assert!(tree.mkdir("/a", &attrs(&[("y", "2")])));
        let a = tree.list_files("/a", 0).unwrap();
        assert_eq!(a.attributes.get("x").unwrap(), "1");
        assert_eq!(a.attributes.get("y").unwrap(), "2");
    }

    #[test]
    fn test_mkdir_through_file_fails_without_side_effects() {
        let tree = NamespaceTree::new();
        assert!(tree.create_file("/a/f", &AttrMap::new()));
        assert!(!tree.mkdir("/a/f/sub", &AttrMap::new()));
        assert!(!tree.exists("/a/f/sub"));
    }

    #[test]
    fn test_create_file_rejects_existing_path() {
        let tree = NamespaceTree::new();
        assert!(tree.create_file("/data/a.txt", &AttrMap::new()));
        assert!(!tree.create_file("/data/a.txt", &AttrMap::new()));
        // Directory at the exact path also blocks file creation.
        assert!(tree.mkdir("/data/sub", &AttrMap::new()));
        assert!(!tree.create_file("/data/sub", &AttrMap::new()));
    }

    #[test]
    fn test_file_nodes_have_no_children() {
        let tree = NamespaceTree::new();
        assert!(tree.create_file("/a/f", &AttrMap::new()));
        assert!(!tree.create_file("/a/f/g", &AttrMap::new()));
        let f = tree.list_files("/a/f", 10).unwrap();
        assert!(f.children.is_empty());
    }

    #[test]
    fn test_delete_missing_and_nonempty() {
        let tree = NamespaceTree::new();
        assert!(!tree.delete("/nope"));
        assert!(tree.create_file("/a/b/f", &AttrMap::new()));
        assert!(!tree.delete("/a/b"));
        assert!(tree.exists("/a/b/f"));
        assert!(!tree.delete("/"));
    }

    #[test]
    fn test_delete_collapses_empty_ancestors() {
        let tree = NamespaceTree::new();
        assert!(tree.create_file("/a/b/c.txt", &AttrMap::new()));
        assert!(tree.delete("/a/b/c.txt"));
        assert!(!tree.exists("/a/b"));
        assert!(!tree.exists("/a"));
        // Root untouched.
        assert!(tree.exists("/"));
    }

    #[test]
    fn test_delete_stops_at_populated_ancestor() {
        let tree = NamespaceTree::new();
        assert!(tree.create_file("/a/b/c.txt", &AttrMap::new()));
        assert!(tree.create_file("/a/b/d.txt", &AttrMap::new()));
        assert!(tree.delete("/a/b/c.txt"));
        assert!(tree.exists("/a/b/d.txt"));
        assert!(tree.exists("/a/b"));
        assert!(tree.exists("/a"));
    }

    #[test]
    fn test_list_files_is_deep_copy_with_depth() {
        let tree = NamespaceTree::new();
        assert!(tree.create_file("/a/b/c/f.txt", &AttrMap::new()));
        let a = tree.list_files("/a", 1).unwrap();
        // Depth 1: "b" is present but its children are not.
        let b = a.children.get("b").unwrap();
        assert!(b.children.is_empty());
        // Mutating the copy leaves the tree intact.
        let mut copy = tree.list_files("/a", 10).unwrap();
        copy.children.clear();
        assert!(tree.exists("/a/b/c/f.txt"));
    }

    #[test]
    fn test_sibling_names_unique_and_paths_consistent() {
        let tree = NamespaceTree::new();
        assert!(tree.mkdir("/x/y", &AttrMap::new()));
        assert!(tree.create_file("/x/y/one", &AttrMap::new()));
        assert!(tree.create_file("/x/y/two", &AttrMap::new()));
        assert!(!tree.create_file("/x/y/one", &AttrMap::new()));

        // Every node's computed full path round-trips back to the node.
        fn walk(tree: &NamespaceTree, node: &NamespaceNode, prefix: &str) {
            for (name, child) in &node.children {
                assert_eq!(name, &child.name);
                let full = format!("{prefix}/{name}");
                assert!(tree.exists(&full), "missing {full}");
                walk(tree, child, &full);
            }
        }
        let root = tree.snapshot_root();
        walk(&tree, &root, "");
    }

    #[test]
    fn test_partition_walk_covers_all_files() {
        let tree = NamespaceTree::new();
        for i in 0..20 {
            assert!(tree.create_file(&format!("/part/f{i}"), &AttrMap::new()));
        }
        let partitions = 4;
        let mut seen: Vec<String> = (0..partitions)
            .flat_map(|p| tree.find_files_by_partition(p, partitions))
            .collect();
        seen.sort();
        assert_eq!(seen.len(), 20);
        // No file lands in two partitions.
        seen.dedup();
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn test_replace_root_swaps_whole_tree() {
        let tree = NamespaceTree::new();
        assert!(tree.create_file("/old/f", &AttrMap::new()));
        let mut fresh = NamespaceNode::root();
        fresh
            .children
            .insert("new".into(), NamespaceNode::directory("new"));
        tree.replace_root(fresh);
        assert!(!tree.exists("/old/f"));
        assert!(tree.exists("/new"));
    }

    #[test]
    fn test_file_count() {
        let tree = NamespaceTree::new();
        assert_eq!(tree.file_count(), 0);
        assert!(tree.create_file("/a/f1", &AttrMap::new()));
        assert!(tree.create_file("/a/b/f2", &AttrMap::new()));
        assert!(tree.mkdir("/empty", &AttrMap::new()));
        assert_eq!(tree.file_count(), 2);
    }
}
