//! Commit engine: fold accumulated peer payloads into the namespace
//! structures.
//!
//! Runs under the exchange lock once the principal's Commit arrives. Every
//! namespace's committed view is zeroed first, then each node's stored
//! payload is applied in succession-list order: the node is appended to the
//! per-namespace succession (its position becoming the node index), and each
//! version group is written into `cluster_versions[node_index][pid]`.
//! Namespaces a peer carries that this node does not know are skipped with a
//! warning; their bytes were already parsed past.

use tracing::{debug, warn};

use crate::cluster::namespace::NamespaceRegistry;
use crate::codec::payload::{self, NamespacesPayload};
use crate::exchange::peers::PeerTable;
use crate::types::NodeId;

/// Apply every node's stored payload to the shared namespace structures.
pub(crate) fn commit_round(registry: &NamespaceRegistry, succession: &[NodeId], peers: &PeerTable) {
    for ns in registry.iter() {
        ns.reset_committed();
    }

    for node in succession {
        let peer = peers
            .get(*node)
            .expect("peer entry missing for succession member");
        match payload::decode(peer.payload()) {
            Ok(decoded) => commit_node(registry, *node, &decoded),
            Err(error) => {
                // Payloads are validated on receipt, so this is a stored
                // payload that was never accepted.
                warn!(node = %node, %error, "skipping node with undecodable stored payload");
            }
        }
    }
}

fn commit_node(registry: &NamespaceRegistry, node: NodeId, decoded: &NamespacesPayload) {
    for ns_payload in &decoded.namespaces {
        let Some(ns) = registry.get(ns_payload.name.as_str()) else {
            // Possibly a rolling namespace addition on the peer.
            warn!(
                namespace = %ns_payload.name,
                node = %node,
                "ignoring unknown namespace in partition info"
            );
            continue;
        };

        let node_index = ns.append_committed_node(node);
        for group in &ns_payload.vinfos {
            for pid in &group.pids {
                ns.set_cluster_version(node_index, *pid, group.vinfo);
            }
        }
        debug!(node = %node, namespace = %ns_payload.name, "committed node data");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    use crate::types::{NamespaceName, PartitionVersion, Pid};

    const A: NodeId = NodeId::new(0xa);
    const B: NodeId = NodeId::new(0xb);

    fn version(tag: u8) -> PartitionVersion {
        let mut bytes = [0u8; 16];
        bytes[0] = tag;
        PartitionVersion::new(bytes)
    }

    fn registry(names: &[&str]) -> NamespaceRegistry {
        NamespaceRegistry::new(
            names
                .iter()
                .map(|n| NamespaceName::new(*n).unwrap())
                .collect(),
        )
        .unwrap()
    }

    fn payload_for(names_versions: &[(&str, u8, &[u16])]) -> Vec<u8> {
        let reg = registry(
            &names_versions
                .iter()
                .map(|(name, _, _)| *name)
                .collect::<Vec<_>>(),
        );
        for (name, tag, pids) in names_versions {
            let ns = reg.get(name).unwrap();
            for pid in *pids {
                ns.set_version(Pid::new(*pid).unwrap(), version(*tag));
            }
        }
        let mut buf = BytesMut::new();
        payload::build_into(&reg, &mut buf);
        buf.to_vec()
    }

    fn peers_with(payloads: &[(NodeId, Vec<u8>)]) -> PeerTable {
        let mut table = PeerTable::new();
        let nodes: Vec<NodeId> = payloads.iter().map(|(node, _)| *node).collect();
        table.reset_to_membership(&nodes);
        for (node, payload) in payloads {
            let peer = table.get_mut(*node).unwrap();
            peer.store_payload(payload);
            peer.received = true;
        }
        table
    }

    #[test]
    fn test_commit_fills_versions_in_succession_order() {
        let local = registry(&["ns"]);
        let peers = peers_with(&[
            (A, payload_for(&[("ns", 1, &[0, 1])])),
            (B, payload_for(&[("ns", 2, &[1])])),
        ]);

        commit_round(&local, &[A, B], &peers);

        let ns = local.get("ns").unwrap();
        assert_eq!(ns.succession(), vec![A, B]);
        assert_eq!(ns.cluster_size(), 2);
        assert_eq!(ns.cluster_version(0, Pid::new(0).unwrap()), Some(version(1)));
        assert_eq!(ns.cluster_version(0, Pid::new(1).unwrap()), Some(version(1)));
        assert_eq!(ns.cluster_version(1, Pid::new(1).unwrap()), Some(version(2)));
        // B reported nothing for pid 0.
        assert_eq!(
            ns.cluster_version(1, Pid::new(0).unwrap()),
            Some(PartitionVersion::NULL)
        );
    }

    #[test]
    fn test_commit_zeroes_previous_round() {
        let local = registry(&["ns"]);
        let peers = peers_with(&[(A, payload_for(&[("ns", 1, &[0])]))]);
        commit_round(&local, &[A], &peers);
        assert_eq!(local.get("ns").unwrap().cluster_size(), 1);

        // A later round without A's namespace data for pid 0.
        let peers = peers_with(&[(B, payload_for(&[("ns", 3, &[5])]))]);
        commit_round(&local, &[B], &peers);

        let ns = local.get("ns").unwrap();
        assert_eq!(ns.succession(), vec![B]);
        assert_eq!(ns.cluster_version(0, Pid::new(5).unwrap()), Some(version(3)));
        assert_eq!(ns.cluster_version(1, Pid::new(0).unwrap()), None);
    }

    #[test]
    fn test_unknown_namespace_is_skipped() {
        // A reports both namespaces, local node only knows ns1.
        let local = registry(&["ns1"]);
        let peers = peers_with(&[(A, payload_for(&[("ns1", 1, &[0]), ("ns2", 2, &[0])]))]);

        commit_round(&local, &[A], &peers);

        let ns1 = local.get("ns1").unwrap();
        assert_eq!(ns1.cluster_size(), 1);
        assert_eq!(ns1.cluster_version(0, Pid::new(0).unwrap()), Some(version(1)));
        assert!(local.get("ns2").is_none());
    }

    #[test]
    fn test_node_without_namespace_gets_no_index() {
        // B has no namespaces at all; ns succession holds only A.
        let local = registry(&["ns"]);
        let peers = peers_with(&[
            (A, payload_for(&[("ns", 1, &[0])])),
            (B, Vec::new()),
        ]);

        commit_round(&local, &[A, B], &peers);
        assert_eq!(local.get("ns").unwrap().succession(), vec![A]);
    }
}
