//! Transport abstraction for liveness probing.
//!
//! The wire protocol is out of scope; the coordinator only needs a way
//! to ask each peer one question.

use async_trait::async_trait;
use ridgefs_common::Result;

/// Channel to peer nameservers for liveness queries.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Ask `peer` whether it can still reach the primary.
    ///
    /// `Ok(true)` means the peer sees the primary alive; `Ok(false)`
    /// means the peer also believes it is down. An `Err` is an
    /// unreachable peer, which counts as a report without a down-vote.
    async fn probe_primary(&self, peer: &str) -> Result<bool>;
}
