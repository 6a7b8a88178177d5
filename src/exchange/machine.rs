//! The exchange state machine.
//!
//! Four states respond to three events (cluster change, timer, inbound
//! message):
//!
//! 1. **Rest** - the last exchange is complete and committed.
//! 2. **Exchanging** - the cluster changed since the last commit and a new
//!    data exchange is in progress.
//! 3. **ReadyToCommit** - this node has sent its data to every member, seen
//!    every ack, and received every member's data.
//! 4. **Orphaned** - this node belongs to no cluster; after a timeout client
//!    transactions are blocked. The machine starts here.
//!
//! Every handler runs with exclusive access to [`ExchangeCore`]; the owning
//! dispatcher holds the exchange lock for the duration of each event, and
//! helpers take `&mut self` rather than re-acquiring anything.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::cluster::namespace::NamespaceRegistry;
use crate::cluster::traits::{FabricTransport, PartitionBalance};
use crate::codec::message::{ExchangeMessage, MsgType};
use crate::codec::payload;
use crate::types::{ClusterKey, NodeId};

use super::commit;
use super::config::ExchangeConfig;
use super::event::{ClusterChangedEvent, ClusteringEvent, ExchangeEvent};
use super::peers::PeerTable;
use super::publisher::EventPublisher;

/// Exchange position in the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// All exchanged data synchronized and committed.
    Rest,
    /// Data exchange in progress.
    Exchanging,
    /// Exchange complete, waiting for the principal's commit.
    ReadyToCommit,
    /// Not a member of any cluster.
    Orphaned,
}

impl ExchangeState {
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeState::Rest => "rest",
            ExchangeState::Exchanging => "exchanging",
            ExchangeState::ReadyToCommit => "ready to commit",
            ExchangeState::Orphaned => "orphaned",
        }
    }
}

/// The membership and version data most recently applied; what the rest of
/// the system observes between rounds.
#[derive(Debug, Clone)]
pub(crate) struct CommittedSnapshot {
    pub cluster_key: ClusterKey,
    pub succession: Arc<[NodeId]>,
    pub principal: Option<NodeId>,
}

impl CommittedSnapshot {
    fn empty() -> Self {
        CommittedSnapshot {
            cluster_key: ClusterKey::NONE,
            succession: Vec::new().into(),
            principal: None,
        }
    }
}

/// All mutable exchange state, owned by the dispatcher's lock.
pub(crate) struct ExchangeCore {
    config: ExchangeConfig,
    state: ExchangeState,

    cluster_key: ClusterKey,
    succession: Vec<NodeId>,
    principal: Option<NodeId>,

    /// When this node's data was last sent out.
    send_ts: Instant,
    /// When this node's ready-to-commit was last sent out.
    ready_to_commit_send_ts: Instant,
    /// When this node entered orphan state.
    orphan_since: Instant,
    /// One-shot latch for blocking transactions while orphaned.
    orphan_transactions_blocked: bool,

    peers: PeerTable,
    /// This node's payload for the current round; reused across rounds.
    self_payload: BytesMut,

    committed: CommittedSnapshot,

    namespaces: Arc<NamespaceRegistry>,
    transport: Arc<dyn FabricTransport>,
    balance: Arc<dyn PartitionBalance>,
    publisher: Arc<EventPublisher>,
}

impl ExchangeCore {
    /// Build the initial state: orphaned, with transactions blocked until a
    /// first membership commits.
    pub fn new(
        config: ExchangeConfig,
        namespaces: Arc<NamespaceRegistry>,
        transport: Arc<dyn FabricTransport>,
        balance: Arc<dyn PartitionBalance>,
        publisher: Arc<EventPublisher>,
        now: Instant,
    ) -> Self {
        ExchangeCore {
            config,
            state: ExchangeState::Orphaned,
            cluster_key: ClusterKey::NONE,
            succession: Vec::new(),
            principal: None,
            send_ts: now,
            ready_to_commit_send_ts: now,
            orphan_since: now,
            orphan_transactions_blocked: true,
            peers: PeerTable::new(),
            self_payload: BytesMut::new(),
            committed: CommittedSnapshot::empty(),
            namespaces,
            transport,
            balance,
            publisher,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn committed(&self) -> &CommittedSnapshot {
        &self.committed
    }

    /// Dispatch one event to the current state's handler.
    pub fn handle_event(&mut self, event: ExchangeEvent, now: Instant) {
        match event {
            ExchangeEvent::ClusterChange(ClusteringEvent::Orphaned) => self.orphaned_handle(now),
            ExchangeEvent::ClusterChange(ClusteringEvent::Changed {
                cluster_key,
                succession,
            }) => self.cluster_change_handle(cluster_key, succession, now),
            ExchangeEvent::Timer => self.timer_handle(now),
            ExchangeEvent::Message { from, msg } => self.msg_handle(from, msg, now),
        }
    }

    // ------------------------------------------------------------------
    // Clustering events (common to all states)
    // ------------------------------------------------------------------

    fn orphaned_handle(&mut self, now: Instant) {
        debug!("got orphaned event");
        self.log_round_abort();

        self.state = ExchangeState::Orphaned;
        self.reset_for_new_round(Vec::new(), ClusterKey::NONE);

        // Stop ongoing migrations if any.
        self.balance.disallow_migrations();
        self.balance.synchronize_migrations();

        // Transactions have not yet been blocked for this orphan transition.
        self.orphan_transactions_blocked = false;
        self.orphan_since = now;
    }

    fn cluster_change_handle(
        &mut self,
        cluster_key: ClusterKey,
        succession: Vec<NodeId>,
        now: Instant,
    ) {
        debug!("got cluster change event");

        if !cluster_key.is_set() || succession.is_empty() {
            warn!(
                cluster_key = %cluster_key,
                members = succession.len(),
                "ignoring cluster change without key or members"
            );
            return;
        }

        self.log_round_abort();
        self.reset_for_new_round(succession, cluster_key);
        self.state = ExchangeState::Exchanging;

        info!(cluster_key = %self.cluster_key, "data exchange started");

        self.prepare_self_payload();
        self.send_data_to_unacked(now);
    }

    fn log_round_abort(&self) {
        if self.state != ExchangeState::Rest && self.state != ExchangeState::Orphaned {
            info!(cluster_key = %self.cluster_key, "aborting partition exchange");
        }
    }

    /// Reset round state, reusing the peer buffers and the self payload
    /// allocation.
    fn reset_for_new_round(&mut self, mut succession: Vec<NodeId>, cluster_key: ClusterKey) {
        let before = succession.len();
        dedup_preserving_order(&mut succession);
        if succession.len() != before {
            warn!("duplicate node ids dropped from succession list");
        }

        self.principal = succession.first().copied();
        self.succession = succession;
        self.peers.reset_to_membership(&self.succession);
        self.cluster_key = cluster_key;
    }

    /// Freeze partition versions and rebuild this node's payload.
    fn prepare_self_payload(&mut self) {
        self.balance.disallow_migrations();
        self.balance.synchronize_migrations();
        payload::build_into(&self.namespaces, &mut self.self_payload);
    }

    // ------------------------------------------------------------------
    // Timer events
    // ------------------------------------------------------------------

    fn timer_handle(&mut self, now: Instant) {
        match self.state {
            ExchangeState::Orphaned => self.orphan_timer_handle(now),
            ExchangeState::Exchanging => self.exchanging_timer_handle(now),
            ExchangeState::ReadyToCommit => self.ready_to_commit_timer_handle(now),
            ExchangeState::Rest => {}
        }
    }

    fn orphan_timer_handle(&mut self, now: Instant) {
        let timeout = self.config.orphan_transaction_block_timeout();
        if self.orphan_transactions_blocked
            || now.saturating_duration_since(self.orphan_since) <= timeout
        {
            return;
        }

        self.orphan_transactions_blocked = true;
        warn!(
            timeout_ms = timeout.as_millis() as u64,
            "blocking client transactions - in orphan state for too long"
        );
        self.balance.revert_to_orphan();
    }

    fn exchanging_timer_handle(&mut self, now: Instant) {
        // The timeout is a linear step function, constant within each step
        // interval.
        let since_send = now.saturating_duration_since(self.send_ts);
        if since_send > self.config.send_timeout(since_send) {
            self.send_data_to_unacked(now);
        }
    }

    fn ready_to_commit_timer_handle(&mut self, now: Instant) {
        let since_send = now.saturating_duration_since(self.ready_to_commit_send_ts);
        if since_send > self.config.ready_to_commit_timeout() {
            // The principal has not answered with a commit; resend so it
            // gets it this time.
            self.send_ready_to_commit(now);
        }
    }

    // ------------------------------------------------------------------
    // Message events
    // ------------------------------------------------------------------

    fn msg_handle(&mut self, from: NodeId, msg: ExchangeMessage, now: Instant) {
        if !msg.is_sane(from, self.cluster_key, &self.succession) {
            return;
        }

        match self.state {
            ExchangeState::Rest => self.rest_msg_handle(from, msg),
            ExchangeState::Exchanging => self.exchanging_msg_handle(from, msg, now),
            ExchangeState::ReadyToCommit => self.ready_to_commit_msg_handle(from, msg),
            // While orphaned the cluster key is unset, so the sanity gate
            // already dropped everything.
            ExchangeState::Orphaned => {}
        }
    }

    fn rest_msg_handle(&mut self, from: NodeId, msg: ExchangeMessage) {
        if self.self_is_principal() && msg.msg_type == MsgType::ReadyToCommit {
            // The commit message did not make it to the source node. Resend.
            debug!(node = %from, "received ready to commit in rest state, resending commit");
            self.send(from, &ExchangeMessage::new(MsgType::Commit, self.cluster_key));
        } else {
            debug!(
                node = %from,
                msg_type = %msg.msg_type,
                "rest state received unexpected message"
            );
        }
    }

    fn exchanging_msg_handle(&mut self, from: NodeId, msg: ExchangeMessage, now: Instant) {
        match msg.msg_type {
            MsgType::Data => self.exchanging_data_msg_handle(from, msg, now),
            MsgType::DataAck => self.exchanging_data_ack_msg_handle(from, now),
            _ => debug!(
                node = %from,
                msg_type = %msg.msg_type,
                "exchanging state received unexpected message"
            ),
        }
    }

    fn exchanging_data_msg_handle(&mut self, from: NodeId, msg: ExchangeMessage, now: Instant) {
        debug!(node = %from, "received exchange data");

        let peer = self
            .peers
            .get_mut(from)
            .expect("peer entry missing for succession member");

        if !peer.received {
            let raw = msg.payload.as_deref().unwrap_or(&[]);
            if let Err(error) = payload::validate(raw) {
                // Not acked; the peer's retransmission retries the delivery.
                warn!(node = %from, %error, "received invalid exchange data payload");
                return;
            }
            peer.store_payload(raw);
            peer.received = true;
        } else {
            info!(node = %from, "received duplicate exchange data");
        }

        self.send(from, &ExchangeMessage::new(MsgType::DataAck, self.cluster_key));
        self.check_switch_ready_to_commit(now);
    }

    fn exchanging_data_ack_msg_handle(&mut self, from: NodeId, now: Instant) {
        debug!(node = %from, "received exchange data ack");

        let peer = self
            .peers
            .get_mut(from)
            .expect("peer entry missing for succession member");

        if !peer.send_acked {
            peer.send_acked = true;
        } else {
            debug!(node = %from, "received duplicate data ack");
        }

        // We might have sent and received everything. Check for completion.
        self.check_switch_ready_to_commit(now);
    }

    fn ready_to_commit_msg_handle(&mut self, from: NodeId, msg: ExchangeMessage) {
        match msg.msg_type {
            MsgType::ReadyToCommit => self.ready_to_commit_rtc_msg_handle(from),
            MsgType::Commit => self.ready_to_commit_commit_msg_handle(from),
            MsgType::Data => {
                // The source must have missed our data ack.
                debug!(node = %from, "received exchange data retransmission");
                self.send(from, &ExchangeMessage::new(MsgType::DataAck, self.cluster_key));
            }
            _ => debug!(
                node = %from,
                msg_type = %msg.msg_type,
                "ready to commit state received unexpected message"
            ),
        }
    }

    fn ready_to_commit_rtc_msg_handle(&mut self, from: NodeId) {
        if !self.self_is_principal() {
            warn!(node = %from, "non-principal received ready to commit message - ignoring");
            return;
        }

        debug!(node = %from, "received ready to commit");

        let peer = self
            .peers
            .get_mut(from)
            .expect("peer entry missing for succession member");
        if !peer.is_ready_to_commit {
            peer.is_ready_to_commit = true;
        } else {
            info!(node = %from, "received duplicate ready to commit message");
        }

        if self.peers.not_ready_to_commit().is_empty() {
            // Everyone is ready; ask the whole succession to commit.
            let commit = ExchangeMessage::new(MsgType::Commit, self.cluster_key);
            debug!(cluster_key = %self.cluster_key, "sending commit message to all nodes");
            for dest in self.succession.clone() {
                self.send(dest, &commit);
            }
        }
    }

    fn ready_to_commit_commit_msg_handle(&mut self, from: NodeId) {
        if Some(from) != self.principal {
            warn!(
                node = %from,
                principal = ?self.principal,
                "ignoring commit message not from principal"
            );
            return;
        }

        info!(node = %from, "received commit command from principal");

        // Fold every node's data into the namespace structures.
        commit::commit_round(&self.namespaces, &self.succession, &self.peers);

        // Exchange is done; the current round becomes the committed view.
        let succession: Arc<[NodeId]> = self.succession.clone().into();
        self.committed = CommittedSnapshot {
            cluster_key: self.cluster_key,
            succession: Arc::clone(&succession),
            principal: self.principal,
        };

        self.balance.balance();
        self.state = ExchangeState::Rest;

        info!(cluster_key = %self.cluster_key, "data exchange completed");

        self.publisher.queue(ClusterChangedEvent {
            cluster_key: self.committed.cluster_key,
            succession,
        });
    }

    // ------------------------------------------------------------------
    // Sends
    // ------------------------------------------------------------------

    /// Send this node's data to every member still missing an ack.
    fn send_data_to_unacked(&mut self, now: Instant) {
        self.send_ts = now;

        let unacked = self.peers.send_unacked();
        if unacked.is_empty() {
            return;
        }

        let msg = ExchangeMessage::data(
            self.cluster_key,
            Bytes::copy_from_slice(&self.self_payload),
        );
        debug!(nodes = ?unacked, "sending exchange data");
        for dest in unacked {
            self.send(dest, &msg);
        }
    }

    fn send_ready_to_commit(&mut self, now: Instant) {
        self.ready_to_commit_send_ts = now;
        let Some(principal) = self.principal else {
            return;
        };
        debug!(node = %principal, "sending ready to commit message");
        self.send(
            principal,
            &ExchangeMessage::new(MsgType::ReadyToCommit, self.cluster_key),
        );
    }

    /// When everything is sent, acked, and received, report readiness to the
    /// principal.
    fn check_switch_ready_to_commit(&mut self, now: Instant) {
        if self.state == ExchangeState::Rest || !self.cluster_key.is_set() {
            return;
        }
        if !self.peers.send_unacked().is_empty() {
            // We still have unacked exchange send messages.
            return;
        }
        if !self.peers.not_received().is_empty() {
            // We still haven't received exchange data from all nodes.
            return;
        }

        self.state = ExchangeState::ReadyToCommit;
        debug!(cluster_key = %self.cluster_key, "ready to commit exchange data");
        self.send_ready_to_commit(now);
    }

    fn send(&self, dest: NodeId, msg: &ExchangeMessage) {
        if let Err(error) = self.transport.send(dest, msg) {
            warn!(node = %dest, msg_type = %msg.msg_type, %error, "error sending exchange message");
        }
    }

    fn self_is_principal(&self) -> bool {
        self.principal == Some(self.config.node_id)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Log the current exchange state.
    pub fn dump(&self, verbose: bool, now: Instant) {
        info!(state = self.state.name(), "EXG state");

        if self.state == ExchangeState::Orphaned {
            info!(
                transactions_blocked = self.orphan_transactions_blocked,
                orphan_since_ms =
                    now.saturating_duration_since(self.orphan_since).as_millis() as u64,
                "EXG orphan status"
            );
            return;
        }

        info!(cluster_key = %self.cluster_key, succession = ?self.succession, "EXG membership");

        if verbose {
            info!(nodes = ?self.peers.send_unacked(), "EXG send pending");
            info!(nodes = ?self.peers.not_received(), "EXG receive pending");
            if self.self_is_principal() {
                info!(nodes = ?self.peers.not_ready_to_commit(), "EXG ready to commit pending");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn peer_nodes(&self) -> Vec<NodeId> {
        self.peers.nodes()
    }

    #[cfg(test)]
    pub(crate) fn transactions_blocked(&self) -> bool {
        self.orphan_transactions_blocked
    }
}

fn dedup_preserving_order(nodes: &mut Vec<NodeId>) {
    let mut seen = std::collections::HashSet::with_capacity(nodes.len());
    nodes.retain(|node| seen.insert(*node));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::cluster::mock_fabric::{MockFabric, MockPartitionBalance};
    use crate::types::NamespaceName;

    const A: NodeId = NodeId::new(0xa);
    const B: NodeId = NodeId::new(0xb);
    const C: NodeId = NodeId::new(0xc);
    const KEY: ClusterKey = ClusterKey::new(0x10);

    struct Harness {
        core: ExchangeCore,
        fabric: Arc<MockFabric>,
        balance: Arc<MockPartitionBalance>,
        start: Instant,
    }

    fn harness(node: NodeId) -> Harness {
        let fabric = MockFabric::new();
        let transport = fabric.register(node);
        let balance = MockPartitionBalance::new();
        let namespaces = Arc::new(
            NamespaceRegistry::new(vec![NamespaceName::new("ns").unwrap()]).unwrap(),
        );
        let publisher = Arc::new(EventPublisher::new());
        let start = Instant::now();
        let core = ExchangeCore::new(
            ExchangeConfig::new(node),
            namespaces,
            transport,
            balance.clone(),
            publisher,
            start,
        );
        Harness {
            core,
            fabric,
            balance,
            start,
        }
    }

    fn changed(succession: &[NodeId]) -> ExchangeEvent {
        ExchangeEvent::ClusterChange(ClusteringEvent::Changed {
            cluster_key: KEY,
            succession: succession.to_vec(),
        })
    }

    fn data_msg(payload: &[u8]) -> ExchangeMessage {
        ExchangeMessage::data(KEY, Bytes::copy_from_slice(payload))
    }

    fn msg(from: NodeId, msg: ExchangeMessage) -> ExchangeEvent {
        ExchangeEvent::Message { from, msg }
    }

    #[test]
    fn test_starts_orphaned_with_transactions_blocked() {
        let h = harness(A);
        assert_eq!(h.core.state(), ExchangeState::Orphaned);
        assert!(h.core.transactions_blocked());
        assert!(!h.core.committed().cluster_key.is_set());
    }

    #[test]
    fn test_initial_orphan_timer_never_reverts() {
        // Construction already blocks transactions, so the one-shot stays
        // spent until an orphaned event re-arms it.
        let mut h = harness(A);
        let later = h.start + Duration::from_secs(3600);
        h.core.handle_event(ExchangeEvent::Timer, later);
        assert_eq!(h.balance.revert_to_orphan_count(), 0);
    }

    #[test]
    fn test_orphan_block_fires_exactly_once() {
        let mut h = harness(A);
        h.core
            .handle_event(ExchangeEvent::ClusterChange(ClusteringEvent::Orphaned), h.start);
        assert!(!h.core.transactions_blocked());

        let timeout = ExchangeConfig::new(A).orphan_transaction_block_timeout();

        // Before the deadline: nothing.
        h.core
            .handle_event(ExchangeEvent::Timer, h.start + timeout - Duration::from_millis(1));
        assert_eq!(h.balance.revert_to_orphan_count(), 0);

        // Past the deadline: exactly one revert.
        h.core
            .handle_event(ExchangeEvent::Timer, h.start + timeout + Duration::from_millis(1));
        assert_eq!(h.balance.revert_to_orphan_count(), 1);
        assert!(h.core.transactions_blocked());

        // Further ticks stay quiet.
        h.core
            .handle_event(ExchangeEvent::Timer, h.start + timeout + Duration::from_secs(60));
        assert_eq!(h.balance.revert_to_orphan_count(), 1);
    }

    #[test]
    fn test_cluster_change_starts_exchange() {
        let mut h = harness(A);
        h.core.handle_event(changed(&[A, B]), h.start);

        assert_eq!(h.core.state(), ExchangeState::Exchanging);
        // Data goes to every member, including self.
        assert_eq!(h.fabric.sends(A, A, MsgType::Data), 1);
        assert_eq!(h.fabric.sends(A, B, MsgType::Data), 1);
        // Migrations stopped before the payload was frozen.
        assert!(h.balance.disallow_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_peer_table_tracks_membership_across_events() {
        let mut h = harness(A);
        h.core.handle_event(changed(&[A, B, C]), h.start);
        let mut nodes = h.core.peer_nodes();
        nodes.sort();
        assert_eq!(nodes, vec![A, B, C]);

        h.core
            .handle_event(ExchangeEvent::ClusterChange(ClusteringEvent::Orphaned), h.start);
        assert!(h.core.peer_nodes().is_empty());
    }

    #[test]
    fn test_ignores_changed_event_without_members() {
        let mut h = harness(A);
        h.core.handle_event(
            ExchangeEvent::ClusterChange(ClusteringEvent::Changed {
                cluster_key: KEY,
                succession: Vec::new(),
            }),
            h.start,
        );
        assert_eq!(h.core.state(), ExchangeState::Orphaned);
    }

    /// Drive A through a full round as a non-principal member of [B, A].
    fn drive_to_ready_to_commit(h: &mut Harness) {
        h.core.handle_event(changed(&[B, A]), h.start);

        // B's data arrives and both acks come in.
        let b_payload = build_test_payload();
        h.core.handle_event(msg(B, data_msg(&b_payload)), h.start);
        h.core
            .handle_event(msg(B, ExchangeMessage::new(MsgType::DataAck, KEY)), h.start);
        // Our own loopback data and ack, until the inbox drains dry.
        loop {
            let queued = h.fabric.drain(A);
            if queued.is_empty() {
                break;
            }
            for (from, raw) in queued {
                let parsed = ExchangeMessage::parse(raw).unwrap();
                h.core.handle_event(msg(from, parsed), h.start);
            }
        }
    }

    fn build_test_payload() -> Vec<u8> {
        let registry =
            NamespaceRegistry::new(vec![NamespaceName::new("ns").unwrap()]).unwrap();
        let mut buf = BytesMut::new();
        payload::build_into(&registry, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_duplicate_data_is_acked_each_time() {
        let mut h = harness(A);
        h.core.handle_event(changed(&[B, A]), h.start);
        h.fabric.drain(A);

        let payload = build_test_payload();
        for _ in 0..3 {
            h.core.handle_event(msg(B, data_msg(&payload)), h.start);
        }

        // Exactly one ack per delivery, state marked received once.
        assert_eq!(h.fabric.sends(A, B, MsgType::DataAck), 3);
        assert_eq!(h.core.state(), ExchangeState::Exchanging);
    }

    #[test]
    fn test_duplicate_ack_does_not_advance_twice() {
        let mut h = harness(A);
        drive_to_ready_to_commit(&mut h);
        assert_eq!(h.core.state(), ExchangeState::ReadyToCommit);
        let rtc_sends = h.fabric.sends(A, B, MsgType::ReadyToCommit);
        assert_eq!(rtc_sends, 1);

        // Replayed ack in ready-to-commit state is not a Data/Ack handler
        // path anymore; state must not regress or re-send.
        h.core
            .handle_event(msg(B, ExchangeMessage::new(MsgType::DataAck, KEY)), h.start);
        assert_eq!(h.core.state(), ExchangeState::ReadyToCommit);
        assert_eq!(h.fabric.sends(A, B, MsgType::ReadyToCommit), rtc_sends);
    }

    #[test]
    fn test_invalid_payload_not_acked_and_retried() {
        let mut h = harness(A);
        h.core.handle_event(changed(&[B, A]), h.start);
        h.fabric.drain(A);

        // Garbage payload: no ack, peer stays un-received.
        h.core
            .handle_event(msg(B, data_msg(&[0xff, 0xff, 0xff])), h.start);
        assert_eq!(h.fabric.sends(A, B, MsgType::DataAck), 0);

        // The retransmitted valid payload is accepted and acked.
        let payload = build_test_payload();
        h.core.handle_event(msg(B, data_msg(&payload)), h.start);
        assert_eq!(h.fabric.sends(A, B, MsgType::DataAck), 1);
    }

    #[test]
    fn test_stale_cluster_key_is_dropped() {
        let mut h = harness(A);
        h.core.handle_event(changed(&[B, A]), h.start);
        h.fabric.drain(A);

        let stale = ExchangeMessage::data(ClusterKey::new(0xdead), Bytes::new());
        h.core.handle_event(msg(B, stale), h.start);
        assert_eq!(h.fabric.sends(A, B, MsgType::DataAck), 0);
        assert_eq!(h.core.state(), ExchangeState::Exchanging);
    }

    #[test]
    fn test_non_principal_ignores_ready_to_commit() {
        let mut h = harness(A);
        drive_to_ready_to_commit(&mut h);
        assert_eq!(h.core.state(), ExchangeState::ReadyToCommit);

        // A is not the principal (B is); an RTC from B must not trigger a
        // commit broadcast from A.
        h.core.handle_event(
            msg(B, ExchangeMessage::new(MsgType::ReadyToCommit, KEY)),
            h.start,
        );
        assert_eq!(h.fabric.sends(A, A, MsgType::Commit), 0);
        assert_eq!(h.fabric.sends(A, B, MsgType::Commit), 0);
    }

    #[test]
    fn test_commit_only_accepted_from_principal() {
        let mut h = harness(A);
        drive_to_ready_to_commit(&mut h);

        // A commit from a non-principal member (A itself) is ignored.
        h.core
            .handle_event(msg(A, ExchangeMessage::new(MsgType::Commit, KEY)), h.start);
        assert_eq!(h.core.state(), ExchangeState::ReadyToCommit);

        // From the principal it commits.
        h.core
            .handle_event(msg(B, ExchangeMessage::new(MsgType::Commit, KEY)), h.start);
        assert_eq!(h.core.state(), ExchangeState::Rest);
        assert_eq!(h.core.committed().cluster_key, KEY);
        assert_eq!(h.core.committed().succession.to_vec(), vec![B, A]);
        assert_eq!(h.core.committed().principal, Some(B));
        assert_eq!(h.balance.balance_count(), 1);
    }

    #[test]
    fn test_data_in_ready_to_commit_is_acked_without_state_change() {
        let mut h = harness(A);
        drive_to_ready_to_commit(&mut h);

        let acks_before = h.fabric.sends(A, B, MsgType::DataAck);
        let payload = build_test_payload();
        h.core.handle_event(msg(B, data_msg(&payload)), h.start);
        assert_eq!(h.fabric.sends(A, B, MsgType::DataAck), acks_before + 1);
        assert_eq!(h.core.state(), ExchangeState::ReadyToCommit);
    }

    #[test]
    fn test_ready_to_commit_retransmits_after_timeout() {
        let mut h = harness(A);
        drive_to_ready_to_commit(&mut h);
        assert_eq!(h.fabric.sends(A, B, MsgType::ReadyToCommit), 1);

        let timeout = ExchangeConfig::new(A).ready_to_commit_timeout();
        h.core
            .handle_event(ExchangeEvent::Timer, h.start + timeout + Duration::from_millis(1));
        assert_eq!(h.fabric.sends(A, B, MsgType::ReadyToCommit), 2);
    }

    #[test]
    fn test_exchanging_retransmits_only_to_unacked() {
        let mut h = harness(A);
        h.core.handle_event(changed(&[A, B, C]), h.start);
        h.fabric.drain(A);
        assert_eq!(h.fabric.sends(A, B, MsgType::Data), 1);

        // B acks; C does not.
        h.core
            .handle_event(msg(B, ExchangeMessage::new(MsgType::DataAck, KEY)), h.start);

        let min = ExchangeConfig::new(A).send_min_timeout();
        h.core
            .handle_event(ExchangeEvent::Timer, h.start + min + Duration::from_millis(1));
        assert_eq!(h.fabric.sends(A, B, MsgType::Data), 1);
        assert_eq!(h.fabric.sends(A, C, MsgType::Data), 2);
    }

    #[test]
    fn test_rest_state_principal_resends_commit() {
        let mut h = harness(A);

        // A as principal of [A, B]: run the whole round inline.
        h.core.handle_event(changed(&[A, B]), h.start);
        let payload = build_test_payload();
        h.core.handle_event(msg(B, data_msg(&payload)), h.start);
        h.core
            .handle_event(msg(B, ExchangeMessage::new(MsgType::DataAck, KEY)), h.start);
        // Deliver A's own loopback traffic (data to self, ack to self, rtc
        // to self, commit to self) until quiet.
        loop {
            let queued = h.fabric.drain(A);
            if queued.is_empty() {
                break;
            }
            for (from, raw) in queued {
                let parsed = ExchangeMessage::parse(raw).unwrap();
                h.core.handle_event(msg(from, parsed), h.start);
            }
            // B reports ready once asked.
            if h.core.state() == ExchangeState::ReadyToCommit
                && h.fabric.sends(A, B, MsgType::Commit) == 0
            {
                h.core.handle_event(
                    msg(B, ExchangeMessage::new(MsgType::ReadyToCommit, KEY)),
                    h.start,
                );
            }
        }
        assert_eq!(h.core.state(), ExchangeState::Rest);
        let commits_to_b = h.fabric.sends(A, B, MsgType::Commit);
        assert!(commits_to_b >= 1);

        // B lost the commit and asks again.
        h.core.handle_event(
            msg(B, ExchangeMessage::new(MsgType::ReadyToCommit, KEY)),
            h.start,
        );
        assert_eq!(h.fabric.sends(A, B, MsgType::Commit), commits_to_b + 1);
        assert_eq!(h.core.state(), ExchangeState::Rest);
    }

    #[test]
    fn test_new_cluster_change_aborts_round() {
        let mut h = harness(A);
        drive_to_ready_to_commit(&mut h);
        assert_eq!(h.core.state(), ExchangeState::ReadyToCommit);

        let new_key = ClusterKey::new(0x11);
        h.core.handle_event(
            ExchangeEvent::ClusterChange(ClusteringEvent::Changed {
                cluster_key: new_key,
                succession: vec![B, A, C],
            }),
            h.start,
        );
        assert_eq!(h.core.state(), ExchangeState::Exchanging);
        // Old-round messages no longer pass the gate.
        h.core
            .handle_event(msg(B, ExchangeMessage::new(MsgType::Commit, KEY)), h.start);
        assert_eq!(h.core.state(), ExchangeState::Exchanging);
        // Committed snapshot untouched by the abort.
        assert!(!h.core.committed().cluster_key.is_set());
    }

    #[test]
    fn test_duplicate_succession_entries_are_dropped() {
        let mut h = harness(A);
        h.core.handle_event(
            ExchangeEvent::ClusterChange(ClusteringEvent::Changed {
                cluster_key: KEY,
                succession: vec![A, B, A],
            }),
            h.start,
        );
        let mut nodes = h.core.peer_nodes();
        nodes.sort();
        assert_eq!(nodes, vec![A, B]);
    }
}
