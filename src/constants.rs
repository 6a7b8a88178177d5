//! Centralized protocol and sizing constants.
//!
//! This module consolidates the magic numbers used throughout the exchange
//! subsystem. Having them in one place makes it easier to:
//!
//! - Understand the protocol constraints
//! - Update values consistently
//! - Document the rationale for each constant

// =============================================================================
// Protocol Constants
// =============================================================================

/// Exchange protocol identifier carried in every wire message.
///
/// Messages with any other identifier are dropped at the sanity gate.
pub const PROTOCOL_IDENTIFIER: u32 = 1;

/// System-wide partition count per namespace.
///
/// Partition ids are in `[0, PARTITION_COUNT)`. The payload codec rejects any
/// pid or count at or beyond this bound.
pub const PARTITION_COUNT: usize = 4096;

/// Maximum number of namespaces a node may carry (and a payload may declare).
pub const NAMESPACE_MAX: usize = 32;

/// Fixed wire size of a namespace name, including the NUL terminator.
///
/// Names are encoded as a zero-padded array of this size; a name that fills
/// the entire array (no room for the NUL) is invalid.
pub const NAMESPACE_NAME_SZ: usize = 32;

/// Wire size of a partition version record.
pub const PARTITION_VERSION_SZ: usize = 16;

// =============================================================================
// Cluster Sizing Constants
// =============================================================================

/// Soft limit for the cluster size.
///
/// Used to pre-size tables and vectors, not to reject membership: algorithms
/// must keep working (possibly degraded) past this limit.
pub const CLUSTER_MAX_SIZE_SOFT: usize = 200;

/// Soft limit for the number of unique partition versions in one namespace.
///
/// Initial sizing for the build-time grouping map.
pub const UNIQUE_VINFO_MAX_SOFT: usize = 200;

/// Average partitions expected per unique version, used as the initial
/// capacity of each pid group while building the self payload.
pub const VINFO_NUM_PIDS_AVG: usize = 1024;

/// Peer payload buffers grow in multiples of this many bytes.
pub const PEER_BUFFER_ALIGN: usize = 1024;

// =============================================================================
// Event Publishing Constants
// =============================================================================

/// Maximum registered cluster-changed event listeners.
///
/// Registration past this count is a structural error and panics.
pub const EVENT_LISTENER_MAX: usize = 7;

/// Number of clustering quantum intervals spent in orphan state before
/// client transactions are blocked.
pub const TRANSACTION_BLOCK_ORPHAN_INTERVALS: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_count_fits_u16_pids() {
        // Pids travel as u16 on the wire.
        assert!(PARTITION_COUNT <= u16::MAX as usize + 1);
    }

    #[test]
    fn test_namespace_name_has_room_for_nul() {
        assert!(NAMESPACE_NAME_SZ > 1);
    }

    #[test]
    #[allow(clippy::assertions_on_constants)]
    fn test_listener_cap_is_small_and_nonzero() {
        assert!(EVENT_LISTENER_MAX >= 1);
        assert!(EVENT_LISTENER_MAX < 64);
    }
}
