//! Exchange configuration and timer sizing.
//!
//! The retransmission timeout is a linear step function of the time since the
//! last send: it starts at the minimum, grows by one minimum per elapsed step
//! interval, and saturates at the maximum. Both the minimum and the step are
//! derived from the heartbeat transmit interval so retransmission pressure
//! tracks the cluster's failure-detection cadence.

use std::time::Duration;

use crate::types::NodeId;

/// Interval between timer events injected into the state machine.
pub const TIMER_TICK_INTERVAL: Duration = Duration::from_millis(75);

/// Floor of the send retransmission timeout.
const SEND_TIMEOUT_FLOOR_MS: u64 = 75;

/// Ceiling of the send retransmission timeout.
const SEND_TIMEOUT_CEILING_MS: u64 = 30_000;

/// Orphan transaction-block timeouts round up to this granularity.
const ORPHAN_BLOCK_ROUND_UP_MS: u64 = 5_000;

/// Configuration for the exchange subsystem.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// This node's id.
    pub node_id: NodeId,

    /// Heartbeat transmit interval of the surrounding cluster.
    /// Consulted only to size retransmission timeouts.
    /// Default: 150ms
    pub heartbeat_tx_interval: Duration,

    /// Clustering quantum interval. Sizes the orphan transaction-block
    /// timeout.
    /// Default: 1s
    pub quantum_interval: Duration,
}

impl ExchangeConfig {
    /// Config with default intervals.
    pub fn new(node_id: NodeId) -> Self {
        ExchangeConfig {
            node_id,
            heartbeat_tx_interval: Duration::from_millis(150),
            quantum_interval: Duration::from_secs(1),
        }
    }

    /// Override the heartbeat transmit interval.
    pub fn with_heartbeat_tx_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_tx_interval = interval;
        self
    }

    /// Override the quantum interval.
    pub fn with_quantum_interval(mut self, interval: Duration) -> Self {
        self.quantum_interval = interval;
        self
    }

    /// Minimum timeout before retransmitting unacked exchange data.
    pub fn send_min_timeout(&self) -> Duration {
        Duration::from_millis(SEND_TIMEOUT_FLOOR_MS.max(self.heartbeat_ms() / 2))
    }

    /// Width of one step of the send-timeout step function.
    pub fn send_step_interval(&self) -> Duration {
        self.send_min_timeout()
            .max(Duration::from_millis(self.heartbeat_ms()))
    }

    /// Current send timeout given the time since the last send.
    pub fn send_timeout(&self, since_send: Duration) -> Duration {
        let min = self.send_min_timeout().as_millis() as u64;
        let step = self.send_step_interval().as_millis() as u64;
        let steps = since_send.as_millis() as u64 / step;
        Duration::from_millis(min.max(SEND_TIMEOUT_CEILING_MS.min(min * steps)))
    }

    /// Timeout before re-sending ReadyToCommit to the principal.
    pub fn ready_to_commit_timeout(&self) -> Duration {
        self.send_min_timeout()
    }

    /// Continuous orphan time after which client transactions are blocked,
    /// rounded up to the nearest 5 seconds.
    pub fn orphan_transaction_block_timeout(&self) -> Duration {
        let timeout = self.quantum_interval.as_millis() as u64
            * crate::constants::TRANSACTION_BLOCK_ORPHAN_INTERVALS as u64;
        let rounded = timeout.div_ceil(ORPHAN_BLOCK_ROUND_UP_MS) * ORPHAN_BLOCK_ROUND_UP_MS;
        Duration::from_millis(rounded)
    }

    fn heartbeat_ms(&self) -> u64 {
        self.heartbeat_tx_interval.as_millis() as u64
    }
}
