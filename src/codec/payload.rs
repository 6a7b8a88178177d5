//! The namespaces payload: the data each node exchanges per round.
//!
//! Wire layout (packed, little-endian):
//!
//! ```text
//! namespaces_payload := u32 num_namespaces, namespace_payload × num_namespaces
//! namespace_payload  := u8[32] name (NUL-terminated), u32 num_vinfos, vinfo_payload × num_vinfos
//! vinfo_payload      := u8[16] vinfo, u32 num_pids, u16 pid × num_pids
//! ```
//!
//! Building scans every partition slot of every configured namespace and
//! groups partition ids by their current version, skipping null-version slots
//! entirely. Namespace order matches configuration order; version order within
//! a namespace is whatever the grouping map yields and is not stable.
//!
//! Validation *is* the decoder run for effect: one bounds-checked reader, so
//! a payload that validates is exactly a payload that decodes. A zero-length
//! payload is tolerated and decodes as "zero namespaces" (a peer with no
//! namespaces configured).

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use nom::IResult;
use nombytes::NomBytes;

use crate::cluster::namespace::NamespaceRegistry;
use crate::constants::{NAMESPACE_MAX, PARTITION_COUNT, UNIQUE_VINFO_MAX_SOFT, VINFO_NUM_PIDS_AVG};
use crate::error::{Error, Result};
use crate::types::{NamespaceName, PartitionVersion, Pid};

use super::{parse_bounded_count, parse_namespace_name, parse_pid, parse_vinfo, put_namespace_name, put_vinfo};

/// Decoded form of a full namespaces payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacesPayload {
    pub namespaces: Vec<NamespacePayload>,
}

/// Decoded payload for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePayload {
    pub name: NamespaceName,
    pub vinfos: Vec<VinfoGroup>,
}

/// One unique version and the partitions that carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VinfoGroup {
    pub vinfo: PartitionVersion,
    pub pids: Vec<Pid>,
}

/// Build this node's payload for the current round into `buf`.
///
/// The buffer is truncated and rebuilt; callers reuse one buffer across
/// rounds.
pub fn build_into(registry: &NamespaceRegistry, buf: &mut BytesMut) {
    buf.clear();
    buf.put_u32_le(registry.len() as u32);

    for ns in registry.iter() {
        // Group non-null versions to their partition ids.
        let mut groups: HashMap<PartitionVersion, Vec<u16>> =
            HashMap::with_capacity(UNIQUE_VINFO_MAX_SOFT);
        ns.with_versions(|versions| {
            for (pid, version) in versions.iter().enumerate() {
                if version.is_null() {
                    continue;
                }
                groups
                    .entry(*version)
                    .or_insert_with(|| Vec::with_capacity(VINFO_NUM_PIDS_AVG))
                    .push(pid as u16);
            }
        });

        tracing::debug!(
            namespace = %ns.name(),
            unique_vinfos = groups.len(),
            "building namespace payload"
        );

        put_namespace_name(buf, ns.name());
        buf.put_u32_le(groups.len() as u32);
        for (vinfo, pids) in &groups {
            put_vinfo(buf, vinfo);
            buf.put_u32_le(pids.len() as u32);
            for pid in pids {
                buf.put_u16_le(*pid);
            }
        }
    }
}

fn parse_vinfo_group(s: NomBytes) -> IResult<NomBytes, VinfoGroup> {
    let (s, vinfo) = parse_vinfo(s)?;
    let (s, num_pids) = parse_bounded_count(PARTITION_COUNT)(s)?;
    let mut pids = Vec::with_capacity(num_pids as usize);
    let mut s = s;
    for _ in 0..num_pids {
        let (rest, pid) = parse_pid(s)?;
        pids.push(pid);
        s = rest;
    }
    Ok((s, VinfoGroup { vinfo, pids }))
}

fn parse_namespace_payload(s: NomBytes) -> IResult<NomBytes, NamespacePayload> {
    let (s, name) = parse_namespace_name(s)?;
    let (s, num_vinfos) = parse_bounded_count(PARTITION_COUNT)(s)?;
    let mut vinfos = Vec::with_capacity(num_vinfos as usize);
    let mut s = s;
    for _ in 0..num_vinfos {
        let (rest, group) = parse_vinfo_group(s)?;
        vinfos.push(group);
        s = rest;
    }
    Ok((s, NamespacePayload { name, vinfos }))
}

fn parse_namespaces_payload(s: NomBytes) -> IResult<NomBytes, NamespacesPayload> {
    let (s, num_namespaces) = parse_bounded_count(NAMESPACE_MAX)(s)?;
    let mut namespaces = Vec::with_capacity(num_namespaces as usize);
    let mut s = s;
    for _ in 0..num_namespaces {
        let (rest, ns) = parse_namespace_payload(s)?;
        namespaces.push(ns);
        s = rest;
    }
    Ok((s, NamespacesPayload { namespaces }))
}

/// Decode a namespaces payload, checking every field bound and requiring the
/// input to be consumed exactly.
pub fn decode(payload: &[u8]) -> Result<NamespacesPayload> {
    if payload.is_empty() {
        // A peer with no namespaces sends nothing at all.
        return Ok(NamespacesPayload {
            namespaces: Vec::new(),
        });
    }

    let input = NomBytes::new(bytes::Bytes::copy_from_slice(payload));
    let (remaining, parsed) = parse_namespaces_payload(input)
        .map_err(|_| Error::InvalidPayload("truncated or malformed namespaces payload"))?;

    if !remaining.into_bytes().is_empty() {
        return Err(Error::InvalidPayload("trailing bytes after namespaces payload"));
    }

    Ok(parsed)
}

/// Validate an inbound payload without keeping the decoded form.
pub fn validate(payload: &[u8]) -> Result<()> {
    decode(payload).map(|_| ())
}
