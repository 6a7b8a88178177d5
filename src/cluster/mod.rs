//! Cluster-facing structures: namespaces shared with the balance engine,
//! collaborator trait seams, and in-memory doubles for tests.

pub mod mock_fabric;
pub mod namespace;
pub mod traits;

pub use mock_fabric::{MockFabric, MockFabricNode, MockPartitionBalance};
pub use namespace::{Namespace, NamespaceRegistry};
pub use traits::{FabricTransport, PartitionBalance};
