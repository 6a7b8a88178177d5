//! Events driving the exchange state machine.

use crate::codec::message::ExchangeMessage;
use crate::types::{ClusterKey, NodeId};

/// Event received from the clustering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusteringEvent {
    /// This node is no longer part of any cluster.
    Orphaned,
    /// A new membership was proposed.
    Changed {
        cluster_key: ClusterKey,
        /// Ordered membership; element 0 is the principal.
        succession: Vec<NodeId>,
    },
}

/// Internal event dispatched to the current state's handler.
#[derive(Debug)]
pub(crate) enum ExchangeEvent {
    /// Cluster change from the clustering layer.
    ClusterChange(ClusteringEvent),
    /// Periodic tick from the timer driver.
    Timer,
    /// Inbound message from the fabric.
    Message { from: NodeId, msg: ExchangeMessage },
}

/// Committed-membership event delivered to registered listeners.
#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    pub cluster_key: ClusterKey,
    /// Stable snapshot of the committed succession; owned by the event so
    /// the live list can change immediately after queueing.
    pub succession: std::sync::Arc<[NodeId]>,
}

impl ClusterChangedEvent {
    pub fn cluster_size(&self) -> usize {
        self.succession.len()
    }
}
