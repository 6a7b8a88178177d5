//! Type-safe wrappers for exchange protocol primitives.
//!
//! These newtypes keep the various 64-bit identifiers and fixed-size byte
//! records from being mixed up, and centralize their wire and display
//! conventions (node ids and cluster keys render as hex, matching the log
//! format of the clustering layer).

use std::fmt;

use crate::constants::{NAMESPACE_NAME_SZ, PARTITION_COUNT, PARTITION_VERSION_SZ};
use crate::error::{Error, Result};

/// Identifier of a cluster membership generation.
///
/// Produced by the clustering layer on every membership change. The zero key
/// is reserved to mean "no cluster" (orphaned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClusterKey(pub u64);

impl ClusterKey {
    /// The "no cluster" key held while orphaned.
    pub const NONE: Self = ClusterKey(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        ClusterKey(value)
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// True for any key naming an actual membership generation.
    #[inline]
    pub const fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl From<u64> for ClusterKey {
    fn from(value: u64) -> Self {
        ClusterKey(value)
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Opaque identifier of one cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub u64);

impl NodeId {
    #[inline]
    pub const fn new(value: u64) -> Self {
        NodeId(value)
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A partition id in `[0, PARTITION_COUNT)`.
///
/// Travels as a `u16` on the wire; construction checks the upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(u16);

impl Pid {
    /// Create a pid, rejecting values at or past the partition count.
    #[inline]
    pub fn new(value: u16) -> Result<Self> {
        if (value as usize) < PARTITION_COUNT {
            Ok(Pid(value))
        } else {
            Err(Error::InvalidPayload("pid out of range"))
        }
    }

    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-partition version record.
///
/// The exchange treats the contents as bytes; the partition subsystem defines
/// the internal structure. All-zero bytes are the distinguished null version,
/// carried by partition slots that hold no data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PartitionVersion(pub [u8; PARTITION_VERSION_SZ]);

impl PartitionVersion {
    /// The null version: a partition slot with no data.
    pub const NULL: Self = PartitionVersion([0u8; PARTITION_VERSION_SZ]);

    #[inline]
    pub const fn new(bytes: [u8; PARTITION_VERSION_SZ]) -> Self {
        PartitionVersion(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; PARTITION_VERSION_SZ] {
        &self.0
    }

    /// Null-vinfo slots are skipped entirely when building payloads.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; PARTITION_VERSION_SZ]
    }
}

impl fmt::Debug for PartitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionVersion(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for PartitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A namespace name bounded to fit the fixed wire array with its NUL
/// terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceName(String);

impl NamespaceName {
    /// Create a name, rejecting anything that cannot be NUL-terminated
    /// within the fixed wire array or that embeds a NUL of its own.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("namespace name is empty".to_string()));
        }
        if name.len() >= NAMESPACE_NAME_SZ {
            return Err(Error::Config(format!(
                "namespace name '{}' exceeds {} bytes",
                name,
                NAMESPACE_NAME_SZ - 1
            )));
        }
        if name.as_bytes().contains(&0) {
            return Err(Error::Config("namespace name contains NUL".to_string()));
        }
        Ok(NamespaceName(name))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_key_none_is_not_set() {
        assert!(!ClusterKey::NONE.is_set());
        assert!(ClusterKey::new(0x10).is_set());
    }

    #[test]
    fn test_cluster_key_display_hex() {
        assert_eq!(format!("{}", ClusterKey::new(0xdead)), "dead");
    }

    #[test]
    fn test_node_id_display_hex() {
        assert_eq!(format!("{}", NodeId::new(0xbb8)), "bb8");
    }

    #[test]
    fn test_node_id_ordering() {
        assert!(NodeId::new(1) < NodeId::new(2));
    }

    #[test]
    fn test_pid_bounds() {
        assert!(Pid::new(0).is_ok());
        assert!(Pid::new((PARTITION_COUNT - 1) as u16).is_ok());
        assert!(Pid::new(PARTITION_COUNT as u16).is_err());
    }

    #[test]
    fn test_partition_version_null() {
        assert!(PartitionVersion::NULL.is_null());
        let mut bytes = [0u8; PARTITION_VERSION_SZ];
        bytes[3] = 1;
        assert!(!PartitionVersion::new(bytes).is_null());
    }

    #[test]
    fn test_partition_version_display() {
        let mut bytes = [0u8; PARTITION_VERSION_SZ];
        bytes[0] = 0xab;
        let v = PartitionVersion::new(bytes);
        assert!(format!("{}", v).starts_with("ab00"));
    }

    #[test]
    fn test_namespace_name_bounds() {
        assert!(NamespaceName::new("ns").is_ok());
        assert!(NamespaceName::new("").is_err());
        assert!(NamespaceName::new("a".repeat(NAMESPACE_NAME_SZ)).is_err());
        // Exactly one byte of room for the terminator.
        assert!(NamespaceName::new("a".repeat(NAMESPACE_NAME_SZ - 1)).is_ok());
    }

    #[test]
    fn test_namespace_name_rejects_embedded_nul() {
        assert!(NamespaceName::new("bad\0name").is_err());
    }
}
