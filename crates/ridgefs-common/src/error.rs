//! Error types for RidgeFS
//!
//! This module defines the common error types used throughout the system.

use thiserror::Error;

/// Common result type for RidgeFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for RidgeFS
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("edit log segment corrupt: {0}")]
    SegmentCorrupt(String),

    #[error("fsimage invalid: {0}")]
    ImageInvalid(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    // Namespace errors
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    // Failover errors
    #[error("promotion failed: {0}")]
    PromotionFailed(String),

    #[error("already promoted")]
    AlreadyPromoted,

    #[error("request timeout")]
    Timeout,

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an fsimage validation error
    pub fn image_invalid(msg: impl Into<String>) -> Self {
        Self::ImageInvalid(msg.into())
    }

    /// Check if this error invalidates a single on-disk candidate rather
    /// than the whole scan (the scan continues with the next candidate).
    #[must_use]
    pub fn is_candidate_invalid(&self) -> bool {
        matches!(
            self,
            Self::ImageInvalid(_) | Self::SegmentCorrupt(_) | Self::Deserialization(_)
        )
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::PeerUnreachable(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::Deserialization(e.to_string())
    }
}
