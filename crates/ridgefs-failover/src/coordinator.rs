//! The node role coordinator.
//!
//! Standby-side state machine:
//!
//! `Standby` → replication link failure → `Probing` (broadcast a
//! liveness query to every tracked peer, await responses with a bounded
//! wait) → quorum of down-votes → `Promoting` → `Primary` (terminal).
//! An inconclusive round (every peer reported, or the wait timed out,
//! without quorum) resets the counters and probes again. With no peers
//! at all the node self-declares and promotes immediately.
//!
//! The coordinator is an explicitly constructed instance handed to the
//! components that report votes or query promotion status; nothing here
//! is process-global.

use crate::materialize::PromotionMaterializer;
use crate::transport::PeerTransport;
use parking_lot::Mutex;
use ridgefs_common::{Error, NodeId, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Coordinator role state, observable by the service layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleState {
    Standby,
    Probing,
    Promoting,
    /// Terminal: a promoted instance never reverts to standby.
    Primary,
}

/// Vote counters for one probing round. The standby's own down-vote is
/// pre-counted, so a fresh round starts at one down-vote.
///
/// Each round carries its own id; a probe response that straggles in
/// after its round closed carries a stale id and is discarded, so one
/// peer can never be counted twice across rounds. Round id 0 means no
/// round is open.
#[derive(Debug)]
struct VoteRound {
    round: u64,
    down_votes: usize,
    total_reports: usize,
}

impl VoteRound {
    fn idle() -> Self {
        Self::start(0)
    }

    fn start(round: u64) -> Self {
        Self {
            round,
            down_votes: 1,
            total_reports: 0,
        }
    }
}

/// Tracks peers, collects liveness votes, and drives promotion.
pub struct RoleCoordinator {
    node_id: NodeId,
    peers: Mutex<BTreeSet<String>>,
    votes: Mutex<VoteRound>,
    round_counter: AtomicU64,
    vote_notify: Notify,
    state: Mutex<RoleState>,
    /// Set while a probe/promotion round is in flight; new peers are
    /// rejected so the vote set cannot grow after quorum calculation
    /// started.
    upgrading: AtomicBool,
    /// One-shot: at most one promotion attempt ever starts.
    promotion_started: AtomicBool,
    probe_timeout: Duration,
}

impl RoleCoordinator {
    #[must_use]
    pub fn new(node_id: NodeId, peers: impl IntoIterator<Item = String>, probe_timeout: Duration) -> Self {
        Self {
            node_id,
            peers: Mutex::new(peers.into_iter().collect()),
            votes: Mutex::new(VoteRound::idle()),
            round_counter: AtomicU64::new(0),
            vote_notify: Notify::new(),
            state: Mutex::new(RoleState::Standby),
            upgrading: AtomicBool::new(false),
            promotion_started: AtomicBool::new(false),
            probe_timeout,
        }
    }

    #[must_use]
    pub fn state(&self) -> RoleState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.state() == RoleState::Primary
    }

    /// True while a probe or promotion round is running. Inbound
    /// connections are turned away for the duration so nothing observes
    /// half-transitioned state.
    #[must_use]
    pub fn promotion_in_flight(&self) -> bool {
        matches!(self.state(), RoleState::Probing | RoleState::Promoting)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Down-votes required for promotion: a strict majority of the full
    /// membership (tracked peers plus self), with the standby's own vote
    /// already counted.
    #[must_use]
    pub fn quorum_required(&self) -> usize {
        let peers = self.peer_count();
        (peers + 1) / 2 + 1
    }

    /// Track a new peer connection. Rejected while a promotion round is
    /// in flight and after promotion.
    pub fn register_peer(&self, peer: impl Into<String>) -> bool {
        if self.upgrading.load(Ordering::SeqCst) || self.promotion_started.load(Ordering::SeqCst) {
            return false;
        }
        self.peers.lock().insert(peer.into())
    }

    pub fn unregister_peer(&self, peer: &str) {
        self.peers.lock().remove(peer);
    }

    /// Record one peer's opinion on primary liveness, counted toward
    /// whichever round is currently open. Votes arriving between rounds
    /// or after a promotion attempt started are ignored.
    pub fn report_vote(&self, primary_down: bool) {
        let round = self.votes.lock().round;
        if round != 0 {
            self.report_vote_for_round(round, primary_down);
        }
    }

    /// Record a probe response belonging to a specific round. Discarded
    /// unless that round is still the open one.
    fn report_vote_for_round(&self, round: u64, primary_down: bool) {
        if self.promotion_started.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut votes = self.votes.lock();
            if votes.round != round {
                return;
            }
            votes.total_reports += 1;
            if primary_down {
                votes.down_votes += 1;
            }
        }
        self.vote_notify.notify_waiters();
    }

    /// Run one probing round: broadcast the liveness query to every
    /// tracked peer and wait (bounded) for quorum. Returns true if
    /// quorum was reached.
    pub async fn run_probe_round(self: &Arc<Self>, transport: &Arc<dyn PeerTransport>) -> bool {
        self.upgrading.store(true, Ordering::SeqCst);
        *self.state.lock() = RoleState::Probing;
        let round = self.round_counter.fetch_add(1, Ordering::SeqCst) + 1;
        *self.votes.lock() = VoteRound::start(round);

        let peers: Vec<String> = self.peers.lock().iter().cloned().collect();
        let quorum = self.quorum_required();
        info!(
            node_id = self.node_id,
            peers = peers.len(),
            quorum,
            "probing peers for primary liveness"
        );

        // No one to corroborate: self-declare.
        if peers.is_empty() {
            return true;
        }

        for peer in peers {
            let coordinator = Arc::clone(self);
            let transport = Arc::clone(transport);
            tokio::spawn(async move {
                match transport.probe_primary(&peer).await {
                    Ok(alive) => coordinator.report_vote_for_round(round, !alive),
                    Err(e) => {
                        // An unreachable peer cannot corroborate either
                        // way; it still counts as a report so the round
                        // can conclude.
                        warn!(peer, "liveness probe failed: {e}");
                        coordinator.report_vote_for_round(round, false);
                    }
                }
            });
        }

        let reached = self.await_round(quorum).await;
        if !reached {
            info!(node_id = self.node_id, "probe round inconclusive");
            // Closing the round invalidates any probe task still in
            // flight; its late response will carry a stale round id.
            *self.votes.lock() = VoteRound::idle();
            self.upgrading.store(false, Ordering::SeqCst);
            *self.state.lock() = RoleState::Standby;
        }
        reached
    }

    /// Wait until quorum, all peers reported, or the round timeout.
    ///
    /// The bounded wait replaces an unbounded block: a timed-out round
    /// is treated exactly like an inconclusive one and restarts probing
    /// rather than hanging.
    async fn await_round(&self, quorum: usize) -> bool {
        let peer_count = self.peer_count();
        let deadline = tokio::time::Instant::now() + self.probe_timeout;
        loop {
            // Register for the wakeup before reading the counters so a
            // vote landing in between is not missed.
            let mut notified = std::pin::pin!(self.vote_notify.notified());
            notified.as_mut().enable();
            {
                let votes = self.votes.lock();
                if votes.down_votes >= quorum {
                    return true;
                }
                if votes.total_reports >= peer_count {
                    return false;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("liveness probe round timed out");
                return false;
            }
        }
    }

    /// Probe repeatedly until quorum confirms the primary is down, then
    /// materialize this replica as the new primary's seed state.
    ///
    /// Materialization failure is fatal to the promotion attempt and is
    /// not retried; the error surfaces to the caller for manual
    /// intervention.
    pub async fn run_failover(
        self: &Arc<Self>,
        transport: &Arc<dyn PeerTransport>,
        materializer: &dyn PromotionMaterializer,
    ) -> Result<()> {
        loop {
            if self.run_probe_round(transport).await {
                return self.promote(materializer);
            }
        }
    }

    /// Promote this node. At most one attempt ever runs; later callers
    /// get `AlreadyPromoted`.
    pub fn promote(&self, materializer: &dyn PromotionMaterializer) -> Result<()> {
        if self
            .promotion_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyPromoted);
        }
        *self.state.lock() = RoleState::Promoting;
        info!(node_id = self.node_id, "quorum confirmed primary down; promoting");

        if let Err(e) = materializer.materialize() {
            error!(node_id = self.node_id, "promotion materialization failed: {e}");
            return Err(e);
        }

        *self.state.lock() = RoleState::Primary;
        info!(node_id = self.node_id, "promotion complete; now primary");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct NoopMaterializer {
        calls: AtomicUsize,
    }

    impl NoopMaterializer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PromotionMaterializer for NoopMaterializer {
        fn materialize(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingMaterializer;

    impl PromotionMaterializer for FailingMaterializer {
        fn materialize(&self) -> Result<()> {
            Err(Error::PromotionFailed("disk full".into()))
        }
    }

    /// Every peer answers the same way.
    struct UniformTransport {
        primary_alive: bool,
    }

    #[async_trait]
    impl PeerTransport for UniformTransport {
        async fn probe_primary(&self, _peer: &str) -> Result<bool> {
            Ok(self.primary_alive)
        }
    }

    /// Never answers; forces the bounded wait to expire.
    struct SilentTransport;

    #[async_trait]
    impl PeerTransport for SilentTransport {
        async fn probe_primary(&self, _peer: &str) -> Result<bool> {
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn coordinator(peers: &[&str]) -> Arc<RoleCoordinator> {
        Arc::new(RoleCoordinator::new(
            7,
            peers.iter().map(|p| (*p).to_string()),
            Duration::from_millis(200),
        ))
    }

    #[test]
    fn test_quorum_arithmetic() {
        // 4 peers (5 total with self) -> 3 down-votes required.
        assert_eq!(coordinator(&["a", "b", "c", "d"]).quorum_required(), 3);
        // 2 peers (3 total) -> 2 required.
        assert_eq!(coordinator(&["a", "b"]).quorum_required(), 2);
        // 0 peers -> 1 required, satisfied by the pre-counted self vote.
        assert_eq!(coordinator(&[]).quorum_required(), 1);
    }

    #[tokio::test]
    async fn test_no_peers_promotes_immediately() {
        let c = coordinator(&[]);
        let transport: Arc<dyn PeerTransport> = Arc::new(UniformTransport { primary_alive: true });
        let m = NoopMaterializer::new();
        c.run_failover(&transport, &m).await.unwrap();
        assert_eq!(c.state(), RoleState::Primary);
        assert_eq!(m.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unanimous_down_votes_promote() {
        let c = coordinator(&["a", "b", "c", "d"]);
        let transport: Arc<dyn PeerTransport> =
            Arc::new(UniformTransport { primary_alive: false });
        let m = NoopMaterializer::new();
        c.run_failover(&transport, &m).await.unwrap();
        assert!(c.is_primary());
    }

    #[tokio::test]
    async fn test_alive_primary_round_inconclusive() {
        let c = coordinator(&["a", "b"]);
        let transport: Arc<dyn PeerTransport> = Arc::new(UniformTransport { primary_alive: true });
        assert!(!c.run_probe_round(&transport).await);
        assert_eq!(c.state(), RoleState::Standby);
        // Counters reset for the next round: the self vote is back to 1.
        assert_eq!(c.votes.lock().down_votes, 1);
        assert_eq!(c.votes.lock().total_reports, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peers_time_out_round() {
        let c = coordinator(&["a", "b", "c"]);
        let transport: Arc<dyn PeerTransport> = Arc::new(SilentTransport);
        assert!(!c.run_probe_round(&transport).await);
        assert_eq!(c.state(), RoleState::Standby);
    }

    #[tokio::test]
    async fn test_at_most_one_promotion() {
        let c = coordinator(&[]);
        let m = NoopMaterializer::new();
        c.promote(&m).unwrap();
        // Late vote after promotion is ignored, and a second attempt is
        // rejected.
        c.report_vote(true);
        assert!(matches!(c.promote(&m), Err(Error::AlreadyPromoted)));
        assert_eq!(m.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_materialization_failure_is_fatal_no_retry() {
        let c = coordinator(&[]);
        let err = c.promote(&FailingMaterializer).unwrap_err();
        assert!(matches!(err, Error::PromotionFailed(_)));
        // The attempt consumed the one-shot; the node is stuck
        // mid-promotion pending manual intervention.
        assert_eq!(c.state(), RoleState::Promoting);
        assert!(matches!(
            c.promote(&FailingMaterializer),
            Err(Error::AlreadyPromoted)
        ));
    }

    #[tokio::test]
    async fn test_register_rejected_during_round() {
        let c = coordinator(&["a"]);
        c.upgrading.store(true, Ordering::SeqCst);
        assert!(!c.register_peer("late-joiner"));
        c.upgrading.store(false, Ordering::SeqCst);
        assert!(c.register_peer("late-joiner"));
        assert_eq!(c.peer_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_round_votes_discarded() {
        // Quorum of 3: one slow peer must not be double-counted across
        // rounds into a false majority.
        let c = coordinator(&["a", "b", "c", "d"]);
        let transport: Arc<dyn PeerTransport> = Arc::new(SilentTransport);
        assert!(!c.run_probe_round(&transport).await);

        // Stragglers from the timed-out round report after it closed.
        c.report_vote_for_round(1, true);
        c.report_vote_for_round(1, true);
        {
            let votes = c.votes.lock();
            assert_eq!(votes.down_votes, 1);
            assert_eq!(votes.total_reports, 0);
        }

        // A later round only counts its own responses.
        *c.votes.lock() = VoteRound::start(2);
        c.report_vote_for_round(1, true);
        c.report_vote_for_round(2, true);
        let votes = c.votes.lock();
        assert_eq!(votes.down_votes, 2);
        assert_eq!(votes.total_reports, 1);
    }

    #[tokio::test]
    async fn test_external_votes_reach_quorum() {
        let c = coordinator(&["a", "b"]);
        *c.state.lock() = RoleState::Probing;
        c.upgrading.store(true, Ordering::SeqCst);
        *c.votes.lock() = VoteRound::start(1);

        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.await_round(c.quorum_required()).await })
        };
        // One peer corroborates: 1 (self) + 1 = 2 = quorum for 3 total.
        c.report_vote(true);
        assert!(waiter.await.unwrap());
    }
}
