//! Datanode directory collaborator.
//!
//! The core consults this narrow interface to place new files and to
//! find a source for re-replication; placement policy itself is out of
//! scope and lives behind the trait.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Allocate/locate interface for datanode bookkeeping.
pub trait DataNodeDirectory: Send + Sync {
    /// Pick `count` target datanodes for a new file, skipping `exclude`.
    fn allocate_nodes(&self, count: usize, exclude: &[String]) -> Vec<String>;

    /// Pick a datanode a replica of `path` can be read from.
    fn choose_readable_node(&self, path: &str) -> Option<String>;
}

/// Round-robin directory over a fixed datanode list.
pub struct StaticDataNodeDirectory {
    nodes: RwLock<Vec<String>>,
    cursor: AtomicUsize,
}

impl StaticDataNodeDirectory {
    pub fn new(nodes: impl IntoIterator<Item = String>) -> Self {
        Self {
            nodes: RwLock::new(nodes.into_iter().collect()),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl DataNodeDirectory for StaticDataNodeDirectory {
    fn allocate_nodes(&self, count: usize, exclude: &[String]) -> Vec<String> {
        let nodes = self.nodes.read();
        let candidates: Vec<&String> = nodes.iter().filter(|n| !exclude.contains(n)).collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(count.min(candidates.len()));
        for _ in 0..count.min(candidates.len()) {
            let i = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
            let node = candidates[i].clone();
            if !out.contains(&node) {
                out.push(node);
            }
        }
        out
    }

    fn choose_readable_node(&self, _path: &str) -> Option<String> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Some(nodes[i].clone())
    }
}
