//! Merkle proofs for single keys.
//!
//! A proof is the serializations of every node on the descent path, root
//! first. Verification re-walks the descent using only the entries: each
//! entry must hash to the digest (or byte-match the inline link) the
//! previous one committed to, and every entry must be consumed.

use bytes::Bytes;

use crate::hp;
use crate::node::{self, HASH_LEN, MptBase, Node, NodeHandle};
use crate::trie::Immutable;
use crate::value::TrieValue;
use crate::{codec, Error};
use alloy_primitives::B256;

impl<V: TrieValue> Immutable<V> {
    /// Collects the proof for `key`: the serialized nodes along the descent
    /// path. `None` when the key is absent (or the trie is empty).
    pub fn get_proof(&self, key: &[u8]) -> Result<Option<Vec<Bytes>>, Error> {
        let Some(root) = &self.root else { return Ok(None) };
        // hash the tree first so the root entry is checkable by digest even
        // when its serialization is shorter than a digest
        node::node_digest(&self.base, root)?;
        let nibs = hp::to_nibs(key);
        let mut entries = Vec::new();
        if collect_proof(&self.base, root, &nibs, 0, &mut entries)? {
            Ok(Some(entries))
        } else {
            Ok(None)
        }
    }

    /// Verifies `proof` for `key` against this version's root digest, using
    /// only the proof entries. Returns the proven value, or `None` when the
    /// proof shows absence. Any mismatch, unused entry or truncation is
    /// [`Error::InvalidProof`].
    pub fn prove(&self, key: &[u8], proof: &[Bytes]) -> Result<Option<V>, Error> {
        let Some(root_digest) = self.root_hash()? else {
            return Err(Error::InvalidProof("no proof can match an empty trie"));
        };
        verify_proof(&self.base, root_digest, key, proof)
    }
}

fn collect_proof<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    nibs: &[u8],
    depth: usize,
    out: &mut Vec<Bytes>,
) -> Result<bool, Error> {
    node::realize(base, h, &nibs[..depth])?;
    out.push(node::node_serialized(base, h)?);
    let rem = &nibs[depth..];
    let guard = h.read();
    match &*guard {
        Node::Leaf { path, .. } => Ok(path.as_slice() == rem),
        Node::Extension { path, next, .. } => {
            if !rem.starts_with(path) {
                return Ok(false);
            }
            let step = path.len();
            let next = next.clone();
            drop(guard);
            collect_proof(base, &next, nibs, depth + step, out)
        }
        Node::Branch { children, value, .. } => {
            if rem.is_empty() {
                return Ok(value.is_some());
            }
            let Some(child) = children[rem[0] as usize].clone() else { return Ok(false) };
            drop(guard);
            collect_proof(base, &child, nibs, depth + 1, out)
        }
        Node::HashRef(_) => Err(Error::Internal("unrealized node after realize")),
    }
}

/// What the previous proof entry committed the next one to.
enum Expected<'a> {
    Digest(B256),
    Inline(&'a [u8]),
}

fn link_expectation(item: &[u8]) -> Result<Option<Expected<'_>>, Error> {
    let first = *item.first().ok_or(Error::Corrupted("empty link item"))?;
    if first >= 0xc0 {
        if item.len() >= HASH_LEN {
            return Err(Error::Corrupted("inlined node not shorter than a digest"));
        }
        return Ok(Some(Expected::Inline(item)));
    }
    let payload = codec::decode_string(item)?;
    match payload.len() {
        0 => Ok(None),
        HASH_LEN => Ok(Some(Expected::Digest(B256::from_slice(payload)))),
        _ => Err(Error::Corrupted("link is neither empty, digest nor inline node")),
    }
}

fn consumed(proof: &[Bytes], next: usize) -> Result<(), Error> {
    if next != proof.len() {
        return Err(Error::InvalidProof("unused proof entries"));
    }
    Ok(())
}

fn verify_proof<V: TrieValue>(
    base: &MptBase,
    root_digest: B256,
    key: &[u8],
    proof: &[Bytes],
) -> Result<Option<V>, Error> {
    let nibs = hp::to_nibs(key);
    let mut depth = 0usize;
    let mut next = 0usize;
    let mut expected = Expected::Digest(root_digest);
    loop {
        let Some(entry) = proof.get(next) else {
            return Err(Error::InvalidProof("truncated proof"));
        };
        next += 1;
        match expected {
            Expected::Digest(digest) => {
                if base.hash.digest(entry) != digest {
                    return Err(Error::InvalidProof("entry does not match its digest"));
                }
            }
            Expected::Inline(bytes) => {
                if entry.as_ref() != bytes {
                    return Err(Error::InvalidProof("entry does not match its inline link"));
                }
            }
        }

        let items = codec::split_list(entry)?;
        let rem = &nibs[depth..];
        match items.len() {
            2 => {
                let (is_leaf, path) = hp::decode_path(codec::decode_string(items[0])?)?;
                if is_leaf {
                    consumed(proof, next)?;
                    if path.as_slice() != rem {
                        return Ok(None);
                    }
                    let payload = codec::decode_string(items[1])?;
                    if payload.is_empty() {
                        return Err(Error::Corrupted("leaf with empty value"));
                    }
                    return Ok(Some(V::from_store(&base.store, payload)?));
                }
                if !rem.starts_with(&path) {
                    consumed(proof, next)?;
                    return Ok(None);
                }
                depth += path.len();
                expected = link_expectation(items[1])?
                    .ok_or(Error::Corrupted("extension without target"))?;
            }
            17 => {
                if rem.is_empty() {
                    consumed(proof, next)?;
                    let payload = codec::decode_string(items[16])?;
                    if payload.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(V::from_store(&base.store, payload)?));
                }
                depth += 1;
                match link_expectation(items[rem[0] as usize])? {
                    Some(link) => expected = link,
                    None => {
                        consumed(proof, next)?;
                        return Ok(None);
                    }
                }
            }
            _ => return Err(Error::Corrupted("node must be a 2-item or 17-item list")),
        }
    }
}
