//! The nameserver service facade.
//!
//! Receives already-parsed commands, drives the tree + edit log, and
//! produces typed responses. Structural failures (create on an existing
//! path, delete of a missing path or non-empty directory) come back as
//! ordinary negative results and are never logged to the WAL, since the
//! attempted mutation did not take effect.

use crate::datanodes::DataNodeDirectory;
use parking_lot::Mutex;
use ridgefs_common::{AttrMap, Command, NodeRole, attr_keys};
use ridgefs_failover::RoleCoordinator;
use ridgefs_journal::{EditLog, EditOp, EditRecord};
use ridgefs_namespace::{NamespaceNode, NamespaceTree};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Replica count used when a create request does not specify one.
const DEFAULT_REPLICA_COUNT: usize = 3;

/// Typed response produced by the facade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CommandResponse {
    Ack {
        ok: bool,
    },
    Listing(Option<NamespaceNode>),
    EditLog(Vec<EditRecord>),
    Role {
        role: NodeRole,
        primary_reachable: bool,
    },
    Error(String),
}

/// Owns the core components and dispatches commands into them.
pub struct NameNodeService {
    tree: Arc<NamespaceTree>,
    log: Arc<EditLog>,
    datanodes: Arc<dyn DataNodeDirectory>,
    role: NodeRole,
    /// Present on standby nodes.
    coordinator: Option<Arc<RoleCoordinator>>,
    /// Standby replication cursor: highest txid replayed locally.
    replayed_tx_id: Arc<AtomicU64>,
    /// Standby's view of the replication link to the primary.
    primary_reachable: Arc<AtomicBool>,
    /// Single serialization point across mutate-then-log: txid order in
    /// the WAL must match the order mutations hit the tree, so the two
    /// steps form one critical section.
    mutation_lock: Mutex<()>,
}

impl NameNodeService {
    pub fn new(
        tree: Arc<NamespaceTree>,
        log: Arc<EditLog>,
        datanodes: Arc<dyn DataNodeDirectory>,
        role: NodeRole,
        coordinator: Option<Arc<RoleCoordinator>>,
    ) -> Self {
        Self {
            tree,
            log,
            datanodes,
            role,
            coordinator,
            replayed_tx_id: Arc::new(AtomicU64::new(0)),
            primary_reachable: Arc::new(AtomicBool::new(true)),
            mutation_lock: Mutex::new(()),
        }
    }

    /// Whether this node currently serves as the primary (started as
    /// one, or promoted since).
    #[must_use]
    pub fn is_primary(&self) -> bool {
        match self.role {
            NodeRole::Primary => true,
            NodeRole::Standby => self
                .coordinator
                .as_ref()
                .is_some_and(|c| c.is_primary()),
        }
    }

    #[must_use]
    pub fn tree(&self) -> &Arc<NamespaceTree> {
        &self.tree
    }

    #[must_use]
    pub fn log(&self) -> &Arc<EditLog> {
        &self.log
    }

    #[must_use]
    pub fn replayed_tx_id(&self) -> &Arc<AtomicU64> {
        &self.replayed_tx_id
    }

    #[must_use]
    pub fn primary_reachable_flag(&self) -> &Arc<AtomicBool> {
        &self.primary_reachable
    }

    /// Dispatch one command.
    pub fn dispatch(&self, command: Command) -> CommandResponse {
        match command {
            Command::Mkdir { path, attrs } => self.handle_mkdir(&path, &attrs),
            Command::CreateFile { path, attrs } => self.handle_create_file(&path, attrs),
            Command::Delete { path } => self.handle_delete(&path),
            Command::ListFiles { path, depth } => {
                CommandResponse::Listing(self.tree.list_files(&path, depth))
            }
            Command::FetchEditLog { from_tx_id } => match self.log.fetch_from(from_tx_id) {
                Ok(records) => CommandResponse::EditLog(records),
                Err(e) => CommandResponse::Error(e.to_string()),
            },
            Command::LivenessQuery => CommandResponse::Role {
                role: if self.is_primary() {
                    NodeRole::Primary
                } else {
                    NodeRole::Standby
                },
                primary_reachable: self.primary_reachable.load(Ordering::SeqCst),
            },
            Command::ReportVote { primary_down } => {
                if let Some(coordinator) = &self.coordinator {
                    coordinator.report_vote(primary_down);
                    CommandResponse::Ack { ok: true }
                } else {
                    CommandResponse::Ack { ok: false }
                }
            }
        }
    }

    fn handle_mkdir(&self, path: &str, attrs: &AttrMap) -> CommandResponse {
        if !self.is_primary() {
            return CommandResponse::Error("not the primary".into());
        }
        // Mutate the tree first, then log: a crash in between leaves a
        // tree mutation with no log entry, which replay repairs; the
        // reverse would not. The lock keeps concurrent dispatches from
        // logging in a different order than they mutated.
        let _ordered = self.mutation_lock.lock();
        if !self.tree.mkdir(path, attrs) {
            return CommandResponse::Ack { ok: false };
        }
        match self.log.log_edit(EditOp::Mkdir, path, attrs) {
            Ok(tx_id) => {
                debug!(tx_id, path, "mkdir");
                CommandResponse::Ack { ok: true }
            }
            Err(e) => CommandResponse::Error(e.to_string()),
        }
    }

    fn handle_create_file(&self, path: &str, mut attrs: AttrMap) -> CommandResponse {
        if !self.is_primary() {
            return CommandResponse::Error("not the primary".into());
        }
        let replica_count = attrs
            .get(attr_keys::REPLICA_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REPLICA_COUNT);
        let targets = self.datanodes.allocate_nodes(replica_count, &[]);
        if targets.is_empty() {
            warn!(path, "no datanodes available for placement");
        } else {
            attrs.insert(attr_keys::REPLICA_LOCATIONS.to_string(), targets.join(","));
        }

        let _ordered = self.mutation_lock.lock();
        if !self.tree.create_file(path, &attrs) {
            return CommandResponse::Ack { ok: false };
        }
        match self.log.log_edit(EditOp::CreateFile, path, &attrs) {
            Ok(tx_id) => {
                debug!(tx_id, path, replicas = targets.len(), "create file");
                CommandResponse::Ack { ok: true }
            }
            Err(e) => CommandResponse::Error(e.to_string()),
        }
    }

    fn handle_delete(&self, path: &str) -> CommandResponse {
        if !self.is_primary() {
            return CommandResponse::Error("not the primary".into());
        }
        let _ordered = self.mutation_lock.lock();
        if !self.tree.delete(path) {
            return CommandResponse::Ack { ok: false };
        }
        match self.log.log_edit(EditOp::Delete, path, &AttrMap::new()) {
            Ok(tx_id) => {
                debug!(tx_id, path, "delete");
                CommandResponse::Ack { ok: true }
            }
            Err(e) => CommandResponse::Error(e.to_string()),
        }
    }
}
