//! Edit log records.
//!
//! One record per accepted namespace mutation. A record is immutable
//! once its txid is assigned; txid order defines replay order.

use ridgefs_common::{AttrMap, Result};
use ridgefs_namespace::NamespaceTree;
use serde::{Deserialize, Serialize};

/// Logged mutation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOp {
    Mkdir,
    CreateFile,
    Delete,
}

/// One logged namespace mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditRecord {
    pub tx_id: u64,
    pub op: EditOp,
    pub path: String,
    pub attributes: AttrMap,
}

impl EditRecord {
    #[must_use]
    pub fn new(tx_id: u64, op: EditOp, path: impl Into<String>, attributes: AttrMap) -> Self {
        Self {
            tx_id,
            op,
            path: path.into(),
            attributes,
        }
    }

    /// Serialize to the on-disk payload (length prefix added by the
    /// segment writer).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Serialized size, used for the flush-threshold accounting.
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(bincode::serialized_size(self)? as usize)
    }

    /// Apply this record to a tree with the same semantics as the live
    /// operations. Returns false if the tree rejected the mutation,
    /// which during replay indicates divergence from the logged history.
    #[must_use]
    pub fn apply(&self, tree: &NamespaceTree) -> bool {
        match self.op {
            EditOp::Mkdir => tree.mkdir(&self.path, &self.attributes),
            EditOp::CreateFile => tree.create_file(&self.path, &self.attributes),
            EditOp::Delete => tree.delete(&self.path),
        }
    }
}
