//! Wire codec for the exchange protocol.
//!
//! Everything on the wire is packed little-endian with no padding. Reads go
//! through `nom` parsers with a bounds check on every field access, so the
//! payload validator is the same code path as the decoder. Writes go through
//! `bytes::BufMut`.

pub mod message;
pub mod payload;

use nom::{IResult, bytes::complete::take, number::complete::le_u16, number::complete::le_u32};
use nombytes::NomBytes;

use crate::constants::{NAMESPACE_NAME_SZ, PARTITION_VERSION_SZ};
use crate::types::{NamespaceName, PartitionVersion, Pid};

/// Fail the whole parse at the given input position.
fn failure(input: NomBytes, kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<NomBytes>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Parse a `u32` count, rejecting values above `max`.
pub(crate) fn parse_bounded_count(
    max: usize,
) -> impl Fn(NomBytes) -> IResult<NomBytes, u32> {
    move |input: NomBytes| {
        let i = input.clone();
        let (s, count) = le_u32(input)?;
        if count as usize > max {
            return Err(failure(i, nom::error::ErrorKind::TooLarge));
        }
        Ok((s, count))
    }
}

/// Parse one fixed-size partition version record.
pub(crate) fn parse_vinfo(s: NomBytes) -> IResult<NomBytes, PartitionVersion> {
    let (s, raw) = take(PARTITION_VERSION_SZ)(s)?;
    let mut bytes = [0u8; PARTITION_VERSION_SZ];
    bytes.copy_from_slice(&raw.into_bytes());
    Ok((s, PartitionVersion::new(bytes)))
}

/// Parse a partition id, rejecting ids at or past the partition count.
pub(crate) fn parse_pid(s: NomBytes) -> IResult<NomBytes, Pid> {
    let i = s.clone();
    let (s, raw) = le_u16(s)?;
    match Pid::new(raw) {
        Ok(pid) => Ok((s, pid)),
        Err(_) => Err(failure(i, nom::error::ErrorKind::Verify)),
    }
}

/// Parse a namespace name from its fixed zero-padded array.
///
/// The name must be NUL-terminated inside the array and valid UTF-8.
pub(crate) fn parse_namespace_name(s: NomBytes) -> IResult<NomBytes, NamespaceName> {
    let i = s.clone();
    let (s, raw) = take(NAMESPACE_NAME_SZ)(s)?;
    let raw = raw.into_bytes();

    let Some(nul) = raw.iter().position(|b| *b == 0) else {
        // Name fills the whole array, no terminator.
        return Err(failure(i, nom::error::ErrorKind::Verify));
    };

    let Ok(name) = std::str::from_utf8(&raw[..nul]) else {
        return Err(failure(i, nom::error::ErrorKind::Verify));
    };

    match NamespaceName::new(name) {
        Ok(name) => Ok((s, name)),
        Err(_) => Err(failure(i, nom::error::ErrorKind::Verify)),
    }
}

/// Append a namespace name as its fixed zero-padded wire array.
pub(crate) fn put_namespace_name<B: bytes::BufMut>(buf: &mut B, name: &NamespaceName) {
    let bytes = name.as_str().as_bytes();
    buf.put_slice(bytes);
    buf.put_bytes(0, NAMESPACE_NAME_SZ - bytes.len());
}

/// Append a partition version record.
pub(crate) fn put_vinfo<B: bytes::BufMut>(buf: &mut B, vinfo: &PartitionVersion) {
    buf.put_slice(vinfo.as_bytes());
}
