//! Canonical serialization helpers for node bytes.
//!
//! Nodes are stored as lists of byte strings in the canonical prefix
//! encoding. `alloy_rlp` already rejects every non-canonical form we care
//! about (non-minimal length forms, length fields with leading zeros, a
//! single byte below 0x80 wrapped in a one-byte-string header), so decoding
//! is a thin layer over [`Header::decode_raw`].

use alloy_rlp::{Encodable, Header, PayloadView};

use crate::Error;

/// Appends the canonical byte-string encoding of `payload` to `out`.
pub(crate) fn append_string(out: &mut Vec<u8>, payload: &[u8]) {
    payload.encode(out);
}

/// Wraps already-encoded items in a list header.
pub(crate) fn wrap_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    Header { list: true, payload_length: payload.len() }.encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

/// Splits a serialized node into its raw items (each still carrying its own
/// header). The input must be a single list with nothing trailing.
pub(crate) fn split_list(buf: &[u8]) -> Result<Vec<&[u8]>, Error> {
    let mut rem = buf;
    let items = match Header::decode_raw(&mut rem)? {
        PayloadView::List(items) => items,
        PayloadView::String(_) => return Err(Error::Corrupted("expected a list")),
    };
    if !rem.is_empty() {
        return Err(Error::Corrupted("trailing bytes after list"));
    }
    Ok(items)
}

/// Decodes a single raw item as a byte string, rejecting lists and trailing
/// bytes.
pub(crate) fn decode_string(item: &[u8]) -> Result<&[u8], Error> {
    let mut rem = item;
    let payload = Header::decode_bytes(&mut rem, false)?;
    if !rem.is_empty() {
        return Err(Error::Corrupted("trailing bytes after string"));
    }
    Ok(payload)
}
