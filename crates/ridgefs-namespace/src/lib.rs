//! RidgeFS Namespace - the in-memory directory/file tree
//!
//! Pure data structure plus concurrency control. Durability lives in
//! `ridgefs-journal`; this crate knows nothing about disks.

pub mod tree;

pub use tree::{NamespaceNode, NamespaceTree, NodeKind};
