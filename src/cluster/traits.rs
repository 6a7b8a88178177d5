//! Trait seams to the subsystems the exchange collaborates with.
//!
//! The exchange never talks to a concrete transport or balance engine; it
//! goes through these traits so production wiring and in-memory test doubles
//! are interchangeable.

use crate::codec::message::ExchangeMessage;
use crate::error::Result;
use crate::types::NodeId;

/// Per-peer message transport.
///
/// Sends happen while the exchange lock is held, so implementations must be
/// prompt: hand the message to an internal queue and return. A send failure
/// is logged and dropped by the caller; the retransmission timer retries.
pub trait FabricTransport: Send + Sync {
    /// Send one message to `dest`. Self-sends must loop back like any other
    /// delivery (the principal acknowledges its own round through them).
    fn send(&self, dest: NodeId, msg: &ExchangeMessage) -> Result<()>;
}

/// Partition-balance engine hooks.
///
/// The exchange drives the balance engine around each round: migrations stop
/// while version data is frozen and exchanged, and a balance pass runs once
/// the round commits.
pub trait PartitionBalance: Send + Sync {
    /// Stop admitting new migrations.
    fn disallow_migrations(&self);

    /// Wait out migrations already in flight.
    fn synchronize_migrations(&self);

    /// Rebalance from the freshly committed cluster view.
    fn balance(&self);

    /// Block client transactions after a prolonged orphan state.
    fn revert_to_orphan(&self);
}
