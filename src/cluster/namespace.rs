//! Namespace structures shared between the exchange and the partition-balance
//! engine.
//!
//! Each namespace owns one current partition version per partition slot
//! (written by the storage side, read when the exchange builds its payload)
//! and the committed view of the last exchange round: a per-namespace
//! succession list and the `cluster_versions[node_index][pid]` table (written
//! by the commit engine, read by the balance engine).
//!
//! The registry is fixed at startup and shared via `Arc`; per-namespace data
//! sits behind its own `RwLock` so balance-side readers do not contend with
//! the exchange lock.

use std::sync::RwLock;

use crate::constants::{NAMESPACE_MAX, PARTITION_COUNT};
use crate::error::{Error, Result};
use crate::types::{NamespaceName, NodeId, PartitionVersion, Pid};

/// One configured namespace.
pub struct Namespace {
    name: NamespaceName,
    data: RwLock<NamespaceData>,
}

struct NamespaceData {
    /// Current version per partition slot.
    partitions: Vec<PartitionVersion>,
    /// Committed per-namespace succession (nodes whose payloads carried this
    /// namespace, in cluster succession order).
    succession: Vec<NodeId>,
    /// Committed version table, `[node_index][pid]`, rows parallel to
    /// `succession`.
    cluster_versions: Vec<Vec<PartitionVersion>>,
}

impl Namespace {
    fn new(name: NamespaceName) -> Self {
        Namespace {
            name,
            data: RwLock::new(NamespaceData {
                partitions: vec![PartitionVersion::NULL; PARTITION_COUNT],
                succession: Vec::new(),
                cluster_versions: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &NamespaceName {
        &self.name
    }

    /// Current version of one partition slot.
    pub fn version(&self, pid: Pid) -> PartitionVersion {
        self.data.read().expect("namespace lock poisoned").partitions[pid.index()]
    }

    /// Set the current version of one partition slot.
    pub fn set_version(&self, pid: Pid, version: PartitionVersion) {
        self.data.write().expect("namespace lock poisoned").partitions[pid.index()] = version;
    }

    /// Run `f` over the current partition versions without copying them.
    pub fn with_versions<R>(&self, f: impl FnOnce(&[PartitionVersion]) -> R) -> R {
        f(&self.data.read().expect("namespace lock poisoned").partitions)
    }

    /// Number of nodes in the committed per-namespace succession.
    pub fn cluster_size(&self) -> usize {
        self.data.read().expect("namespace lock poisoned").succession.len()
    }

    /// Committed per-namespace succession.
    pub fn succession(&self) -> Vec<NodeId> {
        self.data.read().expect("namespace lock poisoned").succession.clone()
    }

    /// Committed version of `pid` as reported by the node at `node_index`.
    ///
    /// Returns `None` past the committed cluster size.
    pub fn cluster_version(&self, node_index: usize, pid: Pid) -> Option<PartitionVersion> {
        let data = self.data.read().expect("namespace lock poisoned");
        data.cluster_versions.get(node_index).map(|row| row[pid.index()])
    }

    /// Drop the committed view ahead of a new commit.
    pub(crate) fn reset_committed(&self) {
        let mut data = self.data.write().expect("namespace lock poisoned");
        data.succession.clear();
        data.cluster_versions.clear();
    }

    /// Append `node` to the committed succession with an all-null version
    /// row, returning its node index.
    pub(crate) fn append_committed_node(&self, node: NodeId) -> usize {
        let mut data = self.data.write().expect("namespace lock poisoned");
        let node_index = data.succession.len();
        data.succession.push(node);
        data.cluster_versions
            .push(vec![PartitionVersion::NULL; PARTITION_COUNT]);
        node_index
    }

    /// Record `version` for `pid` in the committed row of `node_index`.
    pub(crate) fn set_cluster_version(&self, node_index: usize, pid: Pid, version: PartitionVersion) {
        let mut data = self.data.write().expect("namespace lock poisoned");
        data.cluster_versions[node_index][pid.index()] = version;
    }
}

/// The fixed set of namespaces this node carries.
pub struct NamespaceRegistry {
    namespaces: Vec<Namespace>,
}

impl NamespaceRegistry {
    /// Build the registry from the configured namespace names.
    ///
    /// Order is preserved; payloads are emitted in this order.
    pub fn new(names: Vec<NamespaceName>) -> Result<Self> {
        if names.len() > NAMESPACE_MAX {
            return Err(Error::Config(format!(
                "{} namespaces configured, maximum is {}",
                names.len(),
                NAMESPACE_MAX
            )));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::Config(format!("duplicate namespace '{}'", name)));
            }
        }
        Ok(NamespaceRegistry {
            namespaces: names.into_iter().map(Namespace::new).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    /// Look up a namespace by name.
    pub fn get(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.name().as_str() == name)
    }
}
