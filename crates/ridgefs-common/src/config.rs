//! Configuration types for RidgeFS
//!
//! This module defines configuration structures used across components.

use crate::types::NodeRole;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for a RidgeFS nameserver
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NameserverConfig {
    /// Node identity configuration
    pub node: NodeConfig,
    /// Edit log configuration
    pub journal: JournalConfig,
    /// Checkpoint configuration
    pub checkpoint: CheckpointConfig,
    /// Cluster membership configuration
    pub cluster: ClusterConfig,
}

impl Default for NameserverConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            journal: JournalConfig::default(),
            checkpoint: CheckpointConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl NameserverConfig {
    /// Directory holding edit log segments.
    #[must_use]
    pub fn editlog_dir(&self) -> PathBuf {
        self.node.data_dir.join("editlog")
    }

    /// Directory holding fsimage checkpoint files.
    #[must_use]
    pub fn image_dir(&self) -> PathBuf {
        self.node.data_dir.join("fsimage")
    }
}

/// Node identity and role configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier within the cluster
    pub node_id: u64,
    /// Data directory for edit logs and fsimages
    pub data_dir: PathBuf,
    /// Role this node starts in
    pub role: NodeRole,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            data_dir: PathBuf::from("/var/lib/ridgefs"),
            role: NodeRole::Primary,
        }
    }
}

/// Edit log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Active buffer size that forces a synchronous flush (bytes)
    pub flush_threshold_bytes: usize,
    /// Interval of the periodic background flush (milliseconds)
    pub flush_interval_ms: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: 512 * 1024, // 512 KB
            flush_interval_ms: 1000,
        }
    }
}

/// Checkpoint and image-cleanup configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Interval between checkpoints (seconds)
    pub interval_secs: u64,
    /// Interval between image/segment cleanup passes (seconds)
    pub cleanup_interval_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            cleanup_interval_secs: 600,
        }
    }
}

/// Cluster membership configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Peer nameserver addresses (host:port)
    pub peers: Vec<String>,
    /// Bound on a single liveness probe round (milliseconds)
    pub probe_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            probe_timeout_ms: 5000,
        }
    }
}
