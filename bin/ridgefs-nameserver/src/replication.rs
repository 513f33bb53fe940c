//! Standby replication loop.
//!
//! The standby continuously pulls edit records above its own cursor
//! from the primary and replays them into its local tree, keeping a
//! warm, promotable replica. When the pull link fails, the quorum
//! failover protocol takes over.

use crate::net::NameClient;
use crate::service::{CommandResponse, NameNodeService};
use ridgefs_common::Command;
use ridgefs_failover::{PeerTransport, PromotionMaterializer, RoleCoordinator};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Pull-and-replay until shutdown, promotion, or a fatal promotion
/// failure.
pub async fn run_replication(
    service: Arc<NameNodeService>,
    primary_addr: String,
    interval: Duration,
    coordinator: Arc<RoleCoordinator>,
    transport: Arc<dyn PeerTransport>,
    materializer: Arc<dyn PromotionMaterializer>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if pull_once(&service, &primary_addr).await {
                    continue;
                }
                // Replication link failed: enter the probing state
                // machine. Returning Ok means this node is now the
                // primary; an error is fatal to the promotion attempt
                // and needs manual intervention.
                warn!(primary = primary_addr, "replication link down; starting failover");
                service
                    .primary_reachable_flag()
                    .store(false, Ordering::SeqCst);
                match coordinator.run_failover(&transport, materializer.as_ref()).await {
                    Ok(()) => {
                        info!("standby promoted; replication loop ending");
                        return;
                    }
                    Err(e) => {
                        error!("promotion failed, not retrying: {e}");
                        return;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

/// Fetch and replay one batch. Returns false when the primary could not
/// be reached or answered garbage.
async fn pull_once(service: &NameNodeService, primary_addr: &str) -> bool {
    let cursor = service.replayed_tx_id().load(Ordering::SeqCst);
    let response = match NameClient::call(
        primary_addr,
        &Command::FetchEditLog { from_tx_id: cursor },
    )
    .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(primary = primary_addr, "edit log pull failed: {e}");
            return false;
        }
    };

    let CommandResponse::EditLog(records) = response else {
        warn!(primary = primary_addr, "unexpected pull response");
        return false;
    };

    // Replay strictly in ascending txid order.
    for record in records {
        debug_assert!(record.tx_id > cursor);
        if !record.apply(service.tree()) {
            warn!(
                tx_id = record.tx_id,
                path = record.path,
                "replicated record rejected by local tree"
            );
        }
        service
            .replayed_tx_id()
            .fetch_max(record.tx_id, Ordering::SeqCst);
    }
    service
        .primary_reachable_flag()
        .store(true, Ordering::SeqCst);
    true
}
