//! Promotion materialization.
//!
//! Once quorum confirms the primary is down, the standby's replicated
//! state becomes the seed of the new primary: the tree is checkpointed
//! into the node's own image directory (where a restart recovers from),
//! the slot-assignment and user records the standby is holding are
//! persisted beside it, and the edit log counter is seeded past the
//! replayed history so the first post-promotion edit continues the
//! global txid sequence. Any failure here is fatal to the promotion
//! attempt.

use parking_lot::Mutex;
use ridgefs_common::{Error, Result};
use ridgefs_journal::{EditLog, do_checkpoint};
use ridgefs_namespace::NamespaceTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// File holding partition-ownership assignments in the primary dir.
const SLOTS_FILE: &str = "slots.bin";

/// File holding user records in the primary dir.
const USERS_FILE: &str = "users.bin";

/// A user/auth record carried by the metadata service. The secret is
/// opaque to the core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub secret_hash: String,
}

/// Converts local replica state into a new primary's bootstrap state.
pub trait PromotionMaterializer: Send + Sync {
    /// Persist everything the new primary needs to start. Must be
    /// all-or-nothing from the caller's point of view: an `Err` means
    /// the promotion attempt failed.
    fn materialize(&self) -> Result<()>;
}

/// Standard materializer: fsimage seed + slot assignments + users,
/// plus the edit log counter handoff.
pub struct SeedMaterializer {
    tree: Arc<NamespaceTree>,
    /// Highest txid the replica has replayed; becomes the seed image's
    /// cursor and the floor of the log's txid counter.
    replayed_tx_id: Arc<AtomicU64>,
    /// The node's edit log, reseeded at promotion so new edits continue
    /// past the replayed history instead of restarting at 1.
    log: Arc<EditLog>,
    /// The node's data directory; the seed image lands in its `fsimage`
    /// subdirectory, the same place startup recovery scans.
    data_dir: PathBuf,
    /// Partition -> owning datanode address.
    slot_assignments: Mutex<BTreeMap<u64, String>>,
    users: Mutex<Vec<UserRecord>>,
}

impl SeedMaterializer {
    #[must_use]
    pub fn new(
        tree: Arc<NamespaceTree>,
        replayed_tx_id: Arc<AtomicU64>,
        log: Arc<EditLog>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tree,
            replayed_tx_id,
            log,
            data_dir: data_dir.into(),
            slot_assignments: Mutex::new(BTreeMap::new()),
            users: Mutex::new(Vec::new()),
        }
    }

    pub fn set_slot_assignments(&self, slots: BTreeMap<u64, String>) {
        *self.slot_assignments.lock() = slots;
    }

    pub fn set_users(&self, users: Vec<UserRecord>) {
        *self.users.lock() = users;
    }
}

impl PromotionMaterializer for SeedMaterializer {
    fn materialize(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;

        let cursor = self.replayed_tx_id.load(Ordering::SeqCst);
        let image_path = do_checkpoint(
            &self.tree.snapshot_root(),
            cursor,
            &self.data_dir.join("fsimage"),
        )?;

        let slots = bincode::serialize(&*self.slot_assignments.lock())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(self.data_dir.join(SLOTS_FILE), slots)?;

        let users = bincode::serialize(&*self.users.lock())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(self.data_dir.join(USERS_FILE), users)?;

        // Edits issued as the new primary continue the txid sequence
        // the cluster has already seen.
        self.log.seed_tx_id(cursor);

        info!(
            cursor,
            image = %image_path.display(),
            "seeded new primary state"
        );
        Ok(())
    }
}
