//! In-memory fabric and balance-engine doubles for testing.
//!
//! `MockFabric` gives every node an inbox and a [`FabricTransport`] handle
//! whose sends enqueue encoded messages instead of touching a network. Tests
//! pump inboxes explicitly, so delivery order and timing are fully
//! deterministic, and drop rules inject the lost-message faults the protocol
//! has to survive.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

use crate::codec::message::{ExchangeMessage, MsgType};
use crate::error::Result;
use crate::types::NodeId;

use super::traits::{FabricTransport, PartitionBalance};

/// A one-shot rule dropping the next `remaining` matching sends.
#[derive(Debug)]
struct DropRule {
    from: NodeId,
    to: NodeId,
    msg_type: MsgType,
    remaining: u64,
}

/// Shared in-memory fabric connecting any number of nodes.
#[derive(Default)]
pub struct MockFabric {
    inboxes: DashMap<NodeId, VecDeque<(NodeId, Bytes)>>,
    send_counts: DashMap<(NodeId, NodeId, MsgType), u64>,
    drop_rules: Mutex<Vec<DropRule>>,
}

impl MockFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(MockFabric::default())
    }

    /// Register a node and get its transport handle.
    pub fn register(self: &Arc<Self>, node: NodeId) -> Arc<MockFabricNode> {
        self.inboxes.entry(node).or_default();
        Arc::new(MockFabricNode {
            fabric: Arc::clone(self),
            node,
        })
    }

    /// Drop the next `count` messages of `msg_type` sent from `from` to `to`.
    pub fn drop_next(&self, from: NodeId, to: NodeId, msg_type: MsgType, count: u64) {
        self.drop_rules
            .lock()
            .expect("drop rules lock poisoned")
            .push(DropRule {
                from,
                to,
                msg_type,
                remaining: count,
            });
    }

    /// Number of sends of `msg_type` from `from` to `to`, dropped or not.
    pub fn sends(&self, from: NodeId, to: NodeId, msg_type: MsgType) -> u64 {
        self.send_counts
            .get(&(from, to, msg_type))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Total messages currently queued across all inboxes.
    pub fn pending(&self) -> usize {
        self.inboxes.iter().map(|inbox| inbox.len()).sum()
    }

    /// Take everything queued for `node`.
    pub fn drain(&self, node: NodeId) -> Vec<(NodeId, Bytes)> {
        match self.inboxes.get_mut(&node) {
            Some(mut inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn deliver(&self, from: NodeId, to: NodeId, msg: &ExchangeMessage) {
        *self
            .send_counts
            .entry((from, to, msg.msg_type))
            .or_insert(0) += 1;

        {
            let mut rules = self.drop_rules.lock().expect("drop rules lock poisoned");
            if let Some(rule) = rules.iter_mut().find(|r| {
                r.from == from && r.to == to && r.msg_type == msg.msg_type && r.remaining > 0
            }) {
                rule.remaining -= 1;
                return;
            }
        }

        self.inboxes.entry(to).or_default().push_back((from, msg.encode()));
    }
}

/// One node's sending endpoint on the shared fabric.
pub struct MockFabricNode {
    fabric: Arc<MockFabric>,
    node: NodeId,
}

impl FabricTransport for MockFabricNode {
    fn send(&self, dest: NodeId, msg: &ExchangeMessage) -> Result<()> {
        self.fabric.deliver(self.node, dest, msg);
        Ok(())
    }
}

/// Balance-engine double counting every hook invocation.
#[derive(Default)]
pub struct MockPartitionBalance {
    pub disallow_calls: AtomicU64,
    pub synchronize_calls: AtomicU64,
    pub balance_calls: AtomicU64,
    pub revert_to_orphan_calls: AtomicU64,
}

impl MockPartitionBalance {
    pub fn new() -> Arc<Self> {
        Arc::new(MockPartitionBalance::default())
    }

    pub fn balance_count(&self) -> u64 {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn revert_to_orphan_count(&self) -> u64 {
        self.revert_to_orphan_calls.load(Ordering::SeqCst)
    }
}

impl PartitionBalance for MockPartitionBalance {
    fn disallow_migrations(&self) {
        self.disallow_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn synchronize_migrations(&self) {
        self.synchronize_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn balance(&self) {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn revert_to_orphan(&self) {
        self.revert_to_orphan_calls.fetch_add(1, Ordering::SeqCst);
    }
}
