//! Core types shared across RidgeFS components.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xxhash_rust::xxh64::xxh64;

/// Node identifier within the cluster (assigned by configuration).
pub type NodeId = u64;

/// Attribute map attached to namespace nodes and edit records.
///
/// Attribute values are opaque strings to the core; numeric
/// interpretation (replica counts, deletion timestamps) belongs to the
/// calling layer. A `BTreeMap` keeps serialized form deterministic.
pub type AttrMap = BTreeMap<String, String>;

/// Well-known attribute keys used by the nameserver service layer.
pub mod attr_keys {
    /// Comma-separated datanode addresses holding replicas of a file.
    pub const REPLICA_LOCATIONS: &str = "replica_locations";
    /// Requested replica count for a file.
    pub const REPLICA_COUNT: &str = "replica_count";
    /// File size in bytes.
    pub const FILE_SIZE: &str = "file_size";
    /// Millisecond timestamp recorded when a node is marked deleted.
    pub const DELETED_AT: &str = "deleted_at";
}

/// Role of a metadata node within the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Authoritative holder of the namespace; serves all mutations.
    Primary,
    /// Warm replica replaying the primary's edit log.
    Standby,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Standby => write!(f, "standby"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "standby" => Ok(Self::Standby),
            other => Err(crate::Error::configuration(format!(
                "unknown node role '{other}' (expected 'primary' or 'standby')"
            ))),
        }
    }
}

/// An already-parsed command delivered to the nameserver core.
///
/// Wire framing and byte-level parsing live outside the core; by the time
/// a command reaches the service facade it is one of these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    Mkdir {
        path: String,
        attrs: AttrMap,
    },
    CreateFile {
        path: String,
        attrs: AttrMap,
    },
    Delete {
        path: String,
    },
    ListFiles {
        path: String,
        depth: usize,
    },
    FetchEditLog {
        from_tx_id: u64,
    },
    LivenessQuery,
    ReportVote {
        primary_down: bool,
    },
}

/// Hash a full namespace path into one of `partition_count` partitions.
///
/// Used for replica/ownership sharding: a file belongs to the partition
/// its path hashes into.
#[must_use]
pub fn path_partition(path: &str, partition_count: u64) -> u64 {
    debug_assert!(partition_count > 0);
    xxh64(path.as_bytes(), 0) % partition_count
}

/// Split a namespace path into its non-empty segments.
///
/// Accepts both `/a/b/c` and `a/b/c`; the root path (`/` or empty) yields
/// no segments.
#[must_use]
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
