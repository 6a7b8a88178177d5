//! Exchange wire messages and the inbound sanity gate.
//!
//! Every message carries the protocol identifier, a type tag, and the
//! sender's current cluster key. Only `Data` messages carry a namespaces
//! payload. Field order is fixed for wire compatibility:
//!
//! ```text
//! message := u32 id, u32 type, u64 cluster_key [, u32 payload_len, payload]
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::{le_u32, le_u64};
use nombytes::NomBytes;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use tracing::debug;

use crate::constants::PROTOCOL_IDENTIFIER;
use crate::error::{Error, Result};
use crate::types::{ClusterKey, NodeId};

/// Exchange message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum MsgType {
    /// Exchange data for one node.
    Data = 0,
    /// Ack on receipt of exchanged data.
    DataAck = 1,
    /// Reserved, never sent.
    DataNack = 2,
    /// The source has sent and received everything and is ready to commit.
    ReadyToCommit = 3,
    /// Message from the principal asking all nodes to commit.
    Commit = 4,
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MsgType::Data => "data",
            MsgType::DataAck => "data-ack",
            MsgType::DataNack => "data-nack",
            MsgType::ReadyToCommit => "ready-to-commit",
            MsgType::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// One exchange protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMessage {
    /// Protocol identifier as carried on the wire; checked by the sanity
    /// gate, not at parse time.
    pub protocol_id: u32,
    pub msg_type: MsgType,
    pub cluster_key: ClusterKey,
    /// Namespaces payload, present only on `Data`.
    pub payload: Option<Bytes>,
}

impl ExchangeMessage {
    /// Build a payload-less message for the current round.
    pub fn new(msg_type: MsgType, cluster_key: ClusterKey) -> Self {
        ExchangeMessage {
            protocol_id: PROTOCOL_IDENTIFIER,
            msg_type,
            cluster_key,
            payload: None,
        }
    }

    /// Build a `Data` message carrying this node's payload.
    pub fn data(cluster_key: ClusterKey, payload: Bytes) -> Self {
        ExchangeMessage {
            protocol_id: PROTOCOL_IDENTIFIER,
            msg_type: MsgType::Data,
            cluster_key,
            payload: Some(payload),
        }
    }

    /// Encode for the fabric transport.
    pub fn encode(&self) -> Bytes {
        let payload_len = self.payload.as_ref().map(|p| p.len() + 4).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(16 + payload_len);
        buf.put_u32_le(self.protocol_id);
        buf.put_u32_le(self.msg_type as u32);
        buf.put_u64_le(self.cluster_key.value());
        if self.msg_type == MsgType::Data {
            let payload = self.payload.as_deref().unwrap_or(&[]);
            buf.put_u32_le(payload.len() as u32);
            buf.put_slice(payload);
        }
        buf.freeze()
    }

    /// Parse a message off the fabric transport.
    ///
    /// Rejects unknown message types, short buffers, and trailing bytes.
    pub fn parse(raw: Bytes) -> Result<Self> {
        let s = NomBytes::new(raw);

        let (s, protocol_id) =
            le_u32::<_, nom::error::Error<NomBytes>>(s).map_err(|_| short())?;
        let (s, raw_type) = le_u32::<_, nom::error::Error<NomBytes>>(s).map_err(|_| short())?;
        let Some(msg_type) = MsgType::from_u32(raw_type) else {
            return Err(Error::MalformedMessage("unknown message type"));
        };
        let (s, cluster_key) = le_u64::<_, nom::error::Error<NomBytes>>(s).map_err(|_| short())?;

        let (s, payload) = if msg_type == MsgType::Data {
            let (s, len) = le_u32::<_, nom::error::Error<NomBytes>>(s).map_err(|_| short())?;
            let (s, payload) =
                take::<_, _, nom::error::Error<NomBytes>>(len as usize)(s).map_err(|_| short())?;
            (s, Some(payload.into_bytes()))
        } else {
            (s, None)
        };

        if !s.into_bytes().is_empty() {
            return Err(Error::MalformedMessage("trailing bytes"));
        }

        Ok(ExchangeMessage {
            protocol_id,
            msg_type,
            cluster_key: ClusterKey::new(cluster_key),
            payload,
        })
    }

    /// Sanity-check an inbound message before any state handler sees it.
    ///
    /// Passing guarantees a matching protocol identifier and cluster key,
    /// with the source being a member of the current succession list.
    pub fn is_sane(&self, source: NodeId, current_key: ClusterKey, succession: &[NodeId]) -> bool {
        if self.protocol_id != PROTOCOL_IDENTIFIER {
            debug!(
                expected = PROTOCOL_IDENTIFIER,
                was = self.protocol_id,
                "received exchange message with mismatching identifier"
            );
            return false;
        }

        if !succession.contains(&source) {
            debug!(node = %source, "received exchange message from node not in cluster");
            return false;
        }

        if !current_key.is_set() || self.cluster_key != current_key {
            debug!(
                expected = %current_key,
                was = %self.cluster_key,
                "received exchange message with mismatching cluster key"
            );
            return false;
        }

        true
    }
}

fn short() -> Error {
    Error::MalformedMessage("message truncated")
}
