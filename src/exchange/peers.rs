//! Per-peer exchange tracking.
//!
//! The table holds one entry per node in the current succession list; its key
//! set is brought back in sync on every round reset by dropping departed
//! nodes (freeing their payload buffers), resetting flags on retained nodes,
//! and inserting zeroed entries for new nodes.
//!
//! Payload buffers are owned exclusively by their entry, grow in 1 KiB
//! multiples, and keep their capacity across rounds.

use std::collections::HashMap;

use crate::constants::{CLUSTER_MAX_SIZE_SOFT, PEER_BUFFER_ALIGN};
use crate::types::NodeId;

/// Exchange state tracked for one peer.
#[derive(Debug, Default)]
pub(crate) struct PeerState {
    /// The peer has acked our data message.
    pub send_acked: bool,
    /// The peer's data payload has arrived and been accepted.
    pub received: bool,
    /// The peer has reported ready-to-commit. Meaningful only at the
    /// principal.
    pub is_ready_to_commit: bool,
    /// The peer's last accepted payload.
    data: Vec<u8>,
}

impl PeerState {
    fn reset(&mut self) {
        self.send_acked = false;
        self.received = false;
        self.is_ready_to_commit = false;
        self.data.clear();
    }

    /// Store a received payload, growing the buffer to the next 1 KiB
    /// multiple when needed.
    pub fn store_payload(&mut self, payload: &[u8]) {
        self.data.clear();
        let want = payload.len().next_multiple_of(PEER_BUFFER_ALIGN);
        if self.data.capacity() < want {
            self.data.reserve_exact(want);
        }
        self.data.extend_from_slice(payload);
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }
}

/// Node id to peer state, keys mirroring the current succession list.
#[derive(Debug, Default)]
pub(crate) struct PeerTable {
    peers: HashMap<NodeId, PeerState>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable {
            peers: HashMap::with_capacity(CLUSTER_MAX_SIZE_SOFT),
        }
    }

    /// Re-key the table to `succession` for a new round.
    pub fn reset_to_membership(&mut self, succession: &[NodeId]) {
        self.peers.retain(|node, state| {
            if succession.contains(node) {
                state.reset();
                true
            } else {
                false
            }
        });
        for node in succession {
            self.peers.entry(*node).or_default();
        }
    }

    pub fn get(&self, node: NodeId) -> Option<&PeerState> {
        self.peers.get(&node)
    }

    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut PeerState> {
        self.peers.get_mut(&node)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Nodes that have not acked our data message.
    pub fn send_unacked(&self) -> Vec<NodeId> {
        self.scan(|state| !state.send_acked)
    }

    /// Nodes whose data we have not received.
    pub fn not_received(&self) -> Vec<NodeId> {
        self.scan(|state| !state.received)
    }

    /// Nodes that have not reported ready-to-commit.
    pub fn not_ready_to_commit(&self) -> Vec<NodeId> {
        self.scan(|state| !state.is_ready_to_commit)
    }

    /// Key set, for membership-parity checks.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }

    fn scan(&self, predicate: impl Fn(&PeerState) -> bool) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|(_, state)| predicate(state))
            .map(|(node, _)| *node)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: NodeId = NodeId::new(0xa);
    const B: NodeId = NodeId::new(0xb);
    const C: NodeId = NodeId::new(0xc);

    fn sorted(mut nodes: Vec<NodeId>) -> Vec<NodeId> {
        nodes.sort();
        nodes
    }

    #[test]
    fn test_reset_creates_entries() {
        let mut table = PeerTable::new();
        table.reset_to_membership(&[A, B]);
        assert_eq!(table.len(), 2);
        assert_eq!(sorted(table.send_unacked()), vec![A, B]);
        assert_eq!(sorted(table.not_received()), vec![A, B]);
        assert_eq!(sorted(table.not_ready_to_commit()), vec![A, B]);
    }

    #[test]
    fn test_reset_drops_departed_and_keeps_retained() {
        let mut table = PeerTable::new();
        table.reset_to_membership(&[A, B]);
        table.get_mut(A).unwrap().send_acked = true;
        table.get_mut(B).unwrap().store_payload(b"data");

        table.reset_to_membership(&[A, C]);
        assert_eq!(sorted(table.nodes()), vec![A, C]);
        // Flags reset on the retained entry.
        assert!(!table.get(A).unwrap().send_acked);
        assert!(table.get(B).is_none());
    }

    #[test]
    fn test_reset_clears_payload_but_keeps_capacity() {
        let mut table = PeerTable::new();
        table.reset_to_membership(&[A]);
        table.get_mut(A).unwrap().store_payload(&[7u8; 100]);
        let capacity = table.get(A).unwrap().data.capacity();

        table.reset_to_membership(&[A]);
        assert!(table.get(A).unwrap().payload().is_empty());
        assert_eq!(table.get(A).unwrap().data.capacity(), capacity);
    }

    #[test]
    fn test_store_payload_rounds_capacity_up() {
        let mut state = PeerState::default();
        state.store_payload(&[1u8; 100]);
        assert_eq!(state.payload().len(), 100);
        assert!(state.data.capacity() >= PEER_BUFFER_ALIGN);

        state.store_payload(&[2u8; 1500]);
        assert_eq!(state.payload().len(), 1500);
        assert!(state.data.capacity() >= 2 * PEER_BUFFER_ALIGN);
    }

    #[test]
    fn test_scans_reflect_flags() {
        let mut table = PeerTable::new();
        table.reset_to_membership(&[A, B, C]);
        table.get_mut(A).unwrap().send_acked = true;
        table.get_mut(B).unwrap().received = true;
        table.get_mut(C).unwrap().is_ready_to_commit = true;

        assert_eq!(sorted(table.send_unacked()), vec![B, C]);
        assert_eq!(sorted(table.not_received()), vec![A, C]);
        assert_eq!(sorted(table.not_ready_to_commit()), vec![A, B]);
    }

    #[test]
    fn test_empty_membership_clears_table() {
        let mut table = PeerTable::new();
        table.reset_to_membership(&[A, B]);
        table.reset_to_membership(&[]);
        assert_eq!(table.len(), 0);
    }
}
