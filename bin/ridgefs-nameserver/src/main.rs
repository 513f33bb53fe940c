//! RidgeFS Nameserver
//!
//! Primary/backup metadata service: the in-memory namespace tree, the
//! double-buffered write-ahead edit log, fsimage checkpoints, and the
//! quorum-based standby promotion protocol.

mod datanodes;
mod net;
mod replication;
mod service;
mod tasks;

use anyhow::Result;
use clap::Parser;
use datanodes::StaticDataNodeDirectory;
use ridgefs_common::{NameserverConfig, NodeRole, TaskScheduler};
use ridgefs_failover::{RoleCoordinator, SeedMaterializer};
use ridgefs_journal::{EditLog, recover};
use ridgefs_namespace::NamespaceTree;
use service::NameNodeService;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tasks::{CheckpointTask, CleanupTask, FlushTask};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ridgefs-nameserver")]
#[command(about = "RidgeFS Metadata Nameserver")]
#[command(version)]
struct Args {
    /// Data directory for edit logs and fsimages
    #[arg(long, default_value = "/var/lib/ridgefs")]
    data_dir: PathBuf,

    /// Node identifier within the cluster
    #[arg(long, default_value = "1")]
    node_id: u64,

    /// Role to start in (primary or standby)
    #[arg(long, default_value = "primary")]
    role: NodeRole,

    /// Listen address for the command channel
    #[arg(short, long, default_value = "0.0.0.0:7000")]
    listen: String,

    /// Primary nameserver address (standby only)
    #[arg(long)]
    primary: Option<String>,

    /// Peer nameserver addresses for liveness quorum
    #[arg(long)]
    peers: Vec<String>,

    /// Datanode addresses for replica placement
    #[arg(long)]
    datanode: Vec<String>,

    /// Active buffer size that forces a synchronous flush (bytes)
    #[arg(long, default_value = "524288")]
    flush_threshold_bytes: usize,

    /// Periodic flush interval (milliseconds)
    #[arg(long, default_value = "1000")]
    flush_interval_ms: u64,

    /// Checkpoint interval (seconds)
    #[arg(long, default_value = "300")]
    checkpoint_interval_secs: u64,

    /// Image/segment cleanup interval (seconds)
    #[arg(long, default_value = "600")]
    cleanup_interval_secs: u64,

    /// Bound on one liveness probe round (milliseconds)
    #[arg(long, default_value = "5000")]
    probe_timeout_ms: u64,

    /// Replication pull interval (milliseconds, standby only)
    #[arg(long, default_value = "500")]
    replication_interval_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> NameserverConfig {
        let mut config = NameserverConfig::default();
        config.node.node_id = self.node_id;
        config.node.data_dir = self.data_dir.clone();
        config.node.role = self.role;
        config.journal.flush_threshold_bytes = self.flush_threshold_bytes;
        config.journal.flush_interval_ms = self.flush_interval_ms;
        config.checkpoint.interval_secs = self.checkpoint_interval_secs;
        config.checkpoint.cleanup_interval_secs = self.cleanup_interval_secs;
        config.cluster.peers = self.peers.clone();
        config.cluster.probe_timeout_ms = self.probe_timeout_ms;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.to_config();
    info!(
        node_id = config.node.node_id,
        role = %config.node.role,
        data_dir = %config.node.data_dir.display(),
        "starting RidgeFS nameserver"
    );

    // Recover the namespace from disk before serving anything.
    let tree = Arc::new(NamespaceTree::new());
    let recovered = recover(&tree, &config.image_dir(), &config.editlog_dir())?;
    let log = Arc::new(EditLog::open(
        config.editlog_dir(),
        config.journal.flush_threshold_bytes,
    )?);
    log.seed_tx_id(recovered.last_tx_id);
    info!(
        last_tx_id = recovered.last_tx_id,
        files = tree.file_count(),
        "namespace recovered"
    );

    let datanodes = Arc::new(StaticDataNodeDirectory::new(args.datanode.clone()));

    let coordinator = match config.node.role {
        NodeRole::Primary => None,
        NodeRole::Standby => Some(Arc::new(RoleCoordinator::new(
            config.node.node_id,
            config.cluster.peers.clone(),
            Duration::from_millis(config.cluster.probe_timeout_ms),
        ))),
    };

    let service = Arc::new(NameNodeService::new(
        Arc::clone(&tree),
        Arc::clone(&log),
        datanodes,
        config.node.role,
        coordinator.clone(),
    ));
    service
        .replayed_tx_id()
        .store(recovered.last_tx_id, Ordering::SeqCst);

    // Background tasks. The standby flushes nothing and checkpoints
    // nothing locally; its durable seed is written at promotion time.
    let mut scheduler = TaskScheduler::new();
    if config.node.role == NodeRole::Primary {
        scheduler.spawn(
            Arc::new(FlushTask::new(Arc::clone(&log))),
            Duration::from_millis(config.journal.flush_interval_ms),
        );
        scheduler.spawn(
            Arc::new(CheckpointTask::new(
                Arc::clone(&tree),
                Arc::clone(&log),
                config.image_dir(),
            )),
            Duration::from_secs(config.checkpoint.interval_secs),
        );
        scheduler.spawn(
            Arc::new(CleanupTask::new(
                config.image_dir(),
                Some(config.editlog_dir()),
            )),
            Duration::from_secs(config.checkpoint.cleanup_interval_secs),
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Standby: pull-and-replay from the primary, with failover armed.
    let mut replication_handle = None;
    if let (NodeRole::Standby, Some(coordinator)) = (config.node.role, coordinator.clone()) {
        let primary = args.primary.clone().ok_or_else(|| {
            anyhow::anyhow!("--primary is required when starting as a standby")
        })?;
        // The seed targets this node's own data directory, so a restart
        // after promotion recovers from the materialized state, and the
        // log counter is handed the replayed cursor at promotion.
        let materializer = Arc::new(SeedMaterializer::new(
            Arc::clone(&tree),
            Arc::clone(service.replayed_tx_id()),
            Arc::clone(&log),
            config.node.data_dir.clone(),
        ));
        replication_handle = Some(tokio::spawn(replication::run_replication(
            Arc::clone(&service),
            primary,
            Duration::from_millis(args.replication_interval_ms),
            coordinator,
            Arc::new(net::ChannelTransport),
            materializer,
            shutdown_rx.clone(),
        )));
    }

    let listener = TcpListener::bind(&args.listen).await?;
    let server = tokio::spawn(net::serve(
        listener,
        Arc::clone(&service),
        coordinator,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    let _ = shutdown_tx.send(true);
    let _ = server.await;
    if let Some(handle) = replication_handle {
        handle.abort();
    }
    scheduler.shutdown().await;

    // Final flush so nothing buffered is lost on a clean exit.
    log.flush()?;
    info!("nameserver shut down gracefully");
    Ok(())
}
