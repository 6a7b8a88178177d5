//! # Lockstep
//! Cluster partition-version exchange for distributed databases.
//!
//! After every cluster membership change, each member node must learn every
//! other member's per-partition version vector for every namespace, and all
//! members must commit the combined view at the same protocol step before
//! partition rebalancing can proceed. This crate implements that exchange:
//! the four-state protocol machine, the wire codec for the version payloads,
//! per-peer retransmission tracking, and the commit engine that folds the
//! accumulated payloads into the shared namespace structures.
//!
//! # Goals
//! - Deterministic, single-lock event handling for protocol correctness
//! - Bounds-checked parsing of every payload byte with [Nom](https://docs.rs/nom/latest/nom/)
//! - Trait seams to the transport and balance subsystems so the protocol is
//!   testable against in-memory doubles
//!
//! ## Getting started
//!
//! Wire the exchange to your transport and balance engine, start it, and feed
//! it clustering events and fabric messages:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lockstep::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let namespaces = Arc::new(NamespaceRegistry::new(vec![
//!         NamespaceName::new("users")?,
//!     ])?);
//!
//!     // In-memory doubles; production wiring implements the same traits.
//!     let fabric = MockFabric::new();
//!     let node = NodeId::new(0xa);
//!     let exchange = Exchange::new(
//!         ExchangeConfig::new(node),
//!         namespaces,
//!         fabric.register(node),
//!         MockPartitionBalance::new(),
//!     );
//!
//!     exchange.register_listener(Box::new(|event| {
//!         println!("committed cluster {:x}", event.cluster_key.value());
//!     }));
//!
//!     exchange.start();
//!     exchange.handle_clustering_event(ClusteringEvent::Changed {
//!         cluster_key: ClusterKey::new(0x10),
//!         succession: vec![node],
//!     });
//!
//!     // ... pump fabric messages into exchange.handle_fabric_message ...
//!
//!     exchange.stop().await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cluster;
pub mod codec;
pub mod constants;
pub mod error;
pub mod exchange;
pub mod telemetry;
pub mod types;

pub use exchange::{ClusterChangedEvent, ClusteringEvent, Exchange, ExchangeConfig, ExchangeState};

pub mod prelude {
    //! One-stop exports for embedding the exchange.

    pub use crate::cluster::{
        FabricTransport, MockFabric, MockPartitionBalance, Namespace, NamespaceRegistry,
        PartitionBalance,
    };
    pub use crate::codec::message::{ExchangeMessage, MsgType};
    pub use crate::error::{Error, Result};
    pub use crate::exchange::{
        ClusterChangedEvent, ClusteringEvent, Exchange, ExchangeConfig, ExchangeState,
    };
    pub use crate::types::{ClusterKey, NamespaceName, NodeId, PartitionVersion, Pid};

    pub use bytes;
}
