//! Node model: variants, lifecycle states, canonical (de)serialization,
//! digest and link computation, lazy realization, freezing and flushing.
//!
//! Nodes are shared between trie versions through `Arc`; a per-node
//! `RwLock` protects both the structure and the hashed cache (digest,
//! serialization, lifecycle state). Locks are only ever taken parent to
//! child, so recursive walks cannot deadlock.

use std::sync::Arc;

use alloy_primitives::B256;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::cache::NodeCache;
use crate::hp::{self, Nibbles};
use crate::store::BackingStore;
use crate::value::TrieValue;
use crate::{codec, Error, HashKind};

pub(crate) const HASH_LEN: usize = 32;

/// Shared context for every node operation: the backing store, the digest
/// algorithm and the optional node cache.
#[derive(Clone, Debug)]
pub(crate) struct MptBase {
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) hash: HashKind,
    pub(crate) cache: Option<Arc<NodeCache>>,
}

impl MptBase {
    /// Two tries may exchange roots only when they agree on store and hash.
    pub(crate) fn compatible(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store) && self.hash == other.hash
    }

    /// Loads node bytes by digest, going through the node cache when the
    /// node's path is shallow enough.
    fn fetch(&self, nibs: &[u8], digest: &B256) -> Result<Bytes, Error> {
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.get(nibs, digest) {
                return Ok(bytes);
            }
        }
        let bytes = self.store.get(digest)?.ok_or(Error::StoreMiss(*digest))?;
        trace!(%digest, len = bytes.len(), "realized node from store");
        if let Some(cache) = &self.cache {
            cache.put(nibs, *digest, &bytes);
        }
        Ok(bytes)
    }
}

pub(crate) type NodeHandle<V> = Arc<RwLock<Node<V>>>;

/// Lifecycle of a node. States only ever move forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum NodeState {
    /// Mutable in place, owned by exactly one `Mutable` trie.
    #[default]
    Dirty,
    /// Structurally immutable, possibly shared across versions.
    Frozen,
    /// Digest and/or serialization computed and cached.
    Hashed,
    /// Persisted to the backing store.
    Written,
    /// Persisted, and so is the entire subtree below.
    Flushed,
}

/// Per-node bookkeeping shared by the three structural variants.
#[derive(Clone, Debug, Default)]
pub(crate) struct NodeBase {
    pub(crate) state: NodeState,
    pub(crate) digest: Option<B256>,
    pub(crate) serialized: Option<Bytes>,
}

impl NodeBase {
    fn loaded(digest: Option<B256>, serialized: Bytes) -> Self {
        Self { state: NodeState::Flushed, digest, serialized: Some(serialized) }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Node<V> {
    Leaf { base: NodeBase, path: Nibbles, value: V },
    Extension { base: NodeBase, path: Nibbles, next: NodeHandle<V> },
    Branch { base: NodeBase, children: [Option<NodeHandle<V>>; 16], value: Option<V> },
    /// Unrealized reference. Realization replaces the enum value in place
    /// under the write lock, preserving `Arc` identity for all sharers.
    HashRef(B256),
}

impl<V> Node<V> {
    pub(crate) fn base(&self) -> Option<&NodeBase> {
        match self {
            Node::Leaf { base, .. } | Node::Extension { base, .. } | Node::Branch { base, .. } => {
                Some(base)
            }
            Node::HashRef(_) => None,
        }
    }

    pub(crate) fn base_mut(&mut self) -> Option<&mut NodeBase> {
        match self {
            Node::Leaf { base, .. } | Node::Extension { base, .. } | Node::Branch { base, .. } => {
                Some(base)
            }
            Node::HashRef(_) => None,
        }
    }
}

pub(crate) fn handle<V>(node: Node<V>) -> NodeHandle<V> {
    Arc::new(RwLock::new(node))
}

pub(crate) fn new_leaf<V>(path: Nibbles, value: V) -> Node<V> {
    Node::Leaf { base: NodeBase::default(), path, value }
}

/// Ensures the node behind `h` is structural. A `HashRef` is fetched by
/// digest, decoded and swapped in under the write lock; all other variants
/// pass through. `nibs` is the node's path from the root, used as cache key.
pub(crate) fn realize<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    nibs: &[u8],
) -> Result<(), Error> {
    let digest = match &*h.read() {
        Node::HashRef(digest) => *digest,
        _ => return Ok(()),
    };
    let bytes = base.fetch(nibs, &digest)?;
    let node = decode_node(base, Some(digest), &bytes)?;
    let mut guard = h.write();
    if matches!(&*guard, Node::HashRef(_)) {
        *guard = node;
    }
    Ok(())
}

/// Decodes one serialized node. `digest` is the hash the bytes were fetched
/// under (absent for nodes inlined into their parent).
pub(crate) fn decode_node<V: TrieValue>(
    base: &MptBase,
    digest: Option<B256>,
    bytes: &[u8],
) -> Result<Node<V>, Error> {
    let items = codec::split_list(bytes)?;
    let node_base = NodeBase::loaded(digest, Bytes::copy_from_slice(bytes));
    match items.len() {
        2 => {
            let encoded_path = codec::decode_string(items[0])?;
            let (is_leaf, path) = hp::decode_path(encoded_path)?;
            if is_leaf {
                let payload = codec::decode_string(items[1])?;
                if payload.is_empty() {
                    return Err(Error::Corrupted("leaf with empty value"));
                }
                let value = V::from_store(&base.store, payload)?;
                Ok(Node::Leaf { base: node_base, path, value })
            } else {
                if path.is_empty() {
                    return Err(Error::Corrupted("extension with empty path"));
                }
                let next = decode_link(base, items[1])?
                    .ok_or(Error::Corrupted("extension without target"))?;
                Ok(Node::Extension { base: node_base, path, next })
            }
        }
        17 => {
            let mut children: [Option<NodeHandle<V>>; 16] = Default::default();
            for (i, child) in children.iter_mut().enumerate() {
                *child = decode_link(base, items[i])?;
            }
            let payload = codec::decode_string(items[16])?;
            let value =
                if payload.is_empty() { None } else { Some(V::from_store(&base.store, payload)?) };
            Ok(Node::Branch { base: node_base, children, value })
        }
        _ => Err(Error::Corrupted("node must be a 2-item or 17-item list")),
    }
}

/// Decodes one link slot: empty string, 32-byte digest, or an inlined node
/// (a nested list shorter than the digest).
fn decode_link<V: TrieValue>(
    base: &MptBase,
    item: &[u8],
) -> Result<Option<NodeHandle<V>>, Error> {
    let first = *item.first().ok_or(Error::Corrupted("empty link item"))?;
    if first >= 0xc0 {
        if item.len() >= HASH_LEN {
            return Err(Error::Corrupted("inlined node not shorter than a digest"));
        }
        return Ok(Some(handle(decode_node(base, None, item)?)));
    }
    let payload = codec::decode_string(item)?;
    match payload.len() {
        0 => Ok(None),
        HASH_LEN => Ok(Some(handle(Node::HashRef(B256::from_slice(payload))))),
        _ => Err(Error::Corrupted("link is neither empty, digest nor inline node")),
    }
}

/// Marks the node and everything reachable below it immutable. Idempotent;
/// stops at subtrees that are already frozen.
pub(crate) fn freeze<V: TrieValue>(h: &NodeHandle<V>) {
    let children: Vec<NodeHandle<V>> = {
        let mut guard = h.write();
        let collected = match &*guard {
            Node::HashRef(_) => return,
            Node::Extension { next, .. } => vec![next.clone()],
            Node::Branch { children, .. } => children.iter().flatten().cloned().collect(),
            Node::Leaf { .. } => Vec::new(),
        };
        match guard.base_mut() {
            Some(nb) if nb.state == NodeState::Dirty => nb.state = NodeState::Frozen,
            _ => return,
        }
        collected
    };
    for child in children {
        freeze(&child);
    }
}

/// Serializes the node, caching the result. The digest is computed when the
/// serialization is not inlineable or when `force_hash` asks for it (the
/// root). Returns the serialization and the digest, if one was computed.
fn ensure_hashed<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    force_hash: bool,
) -> Result<(Bytes, Option<B256>), Error> {
    let encoded: Bytes = {
        let guard = h.read();
        if matches!(&*guard, Node::HashRef(_)) {
            return Err(Error::Internal("hashing an unrealized node"));
        }
        let nb = guard.base().ok_or(Error::Internal("missing node base"))?;
        match &nb.serialized {
            Some(serialized) => {
                if nb.digest.is_some() || (!force_hash && serialized.len() < HASH_LEN) {
                    return Ok((serialized.clone(), nb.digest));
                }
                serialized.clone()
            }
            None => Bytes::from(encode_node(base, &guard)?),
        }
    };
    let digest =
        (force_hash || encoded.len() >= HASH_LEN).then(|| base.hash.digest(&encoded));

    // Double-checked publish: another thread may have hashed the same frozen
    // node concurrently; the bytes are identical either way.
    let mut guard = h.write();
    let nb = guard.base_mut().ok_or(Error::Internal("missing node base"))?;
    if nb.serialized.is_none() {
        nb.serialized = Some(encoded);
    }
    if nb.digest.is_none() {
        nb.digest = digest;
    }
    if nb.state < NodeState::Hashed {
        nb.state = NodeState::Hashed;
    }
    let serialized = nb.serialized.clone().ok_or(Error::Internal("serialization vanished"))?;
    Ok((serialized, nb.digest))
}

/// Canonical serialization of a structural node. Recurses into children
/// through [`node_link`], so the whole subtree ends up hashed bottom-up.
fn encode_node<V: TrieValue>(base: &MptBase, node: &Node<V>) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    match node {
        Node::Leaf { path, value, .. } => {
            codec::append_string(&mut payload, &hp::to_encoded_path(path, true));
            codec::append_string(&mut payload, &value.to_bytes());
        }
        Node::Extension { path, next, .. } => {
            codec::append_string(&mut payload, &hp::to_encoded_path(path, false));
            node_link(base, next, &mut payload)?;
        }
        Node::Branch { children, value, .. } => {
            for child in children {
                match child {
                    Some(child) => node_link(base, child, &mut payload)?,
                    None => payload.push(alloy_rlp::EMPTY_STRING_CODE),
                }
            }
            match value {
                Some(value) => codec::append_string(&mut payload, &value.to_bytes()),
                None => payload.push(alloy_rlp::EMPTY_STRING_CODE),
            }
        }
        Node::HashRef(_) => return Err(Error::Internal("encoding an unrealized node")),
    }
    Ok(codec::wrap_list(payload))
}

/// Appends the link form of a child to `out`: the raw serialization when it
/// is shorter than a digest, the encoded digest otherwise.
pub(crate) fn node_link<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    out: &mut Vec<u8>,
) -> Result<(), Error> {
    if let Node::HashRef(digest) = &*h.read() {
        codec::append_string(out, digest.as_slice());
        return Ok(());
    }
    let (serialized, digest) = ensure_hashed(base, h, false)?;
    if serialized.len() < HASH_LEN {
        out.extend_from_slice(&serialized);
    } else {
        let digest = digest.ok_or(Error::Internal("hashed node without digest"))?;
        codec::append_string(out, digest.as_slice());
    }
    Ok(())
}

/// Digest of the node, computed unconditionally (the root is always hashed,
/// however small its serialization).
pub(crate) fn node_digest<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
) -> Result<B256, Error> {
    if let Node::HashRef(digest) = &*h.read() {
        return Ok(*digest);
    }
    let (_, digest) = ensure_hashed(base, h, true)?;
    digest.ok_or(Error::Internal("forced hash produced no digest"))
}

/// Canonical serialization of a realized node (proof entries).
pub(crate) fn node_serialized<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
) -> Result<Bytes, Error> {
    if matches!(&*h.read(), Node::HashRef(_)) {
        return Err(Error::Internal("serializing an unrealized node"));
    }
    Ok(ensure_hashed(base, h, false)?.0)
}

/// Persists the subtree bottom-up: children first, then leaf/branch values,
/// then the node's own bytes (when it has a digest; inlined nodes travel
/// inside their parent). Already-flushed subtrees are skipped, which makes
/// flushing idempotent and restartable after a store failure.
pub(crate) fn flush_node<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    nibs: &mut Vec<u8>,
) -> Result<(), Error> {
    let (children, values): (Vec<(Nibbles, NodeHandle<V>)>, Vec<V>) = {
        let guard = h.read();
        match &*guard {
            Node::HashRef(_) => return Ok(()),
            node => {
                let nb = node.base().ok_or(Error::Internal("missing node base"))?;
                if nb.state == NodeState::Flushed {
                    return Ok(());
                }
                match node {
                    Node::Leaf { value, .. } => (Vec::new(), vec![value.clone()]),
                    Node::Extension { path, next, .. } => {
                        (vec![(path.clone(), next.clone())], Vec::new())
                    }
                    Node::Branch { children, value, .. } => {
                        let mut kids = Vec::new();
                        for (i, child) in children.iter().enumerate() {
                            if let Some(child) = child {
                                kids.push((Nibbles::from_slice(&[i as u8]), child.clone()));
                            }
                        }
                        (kids, value.iter().cloned().collect())
                    }
                    Node::HashRef(_) => return Ok(()),
                }
            }
        }
    };

    let depth = nibs.len();
    for (segment, child) in children {
        nibs.extend_from_slice(&segment);
        let res = flush_node(base, &child, nibs);
        nibs.truncate(depth);
        res?;
    }
    for value in values {
        value.flush()?;
    }

    let (digest, serialized) = {
        let guard = h.read();
        match guard.base() {
            Some(nb) => (nb.digest, nb.serialized.clone()),
            None => return Ok(()),
        }
    };
    let serialized = serialized.ok_or(Error::Internal("flushing an unhashed node"))?;
    if let Some(digest) = digest {
        base.store.put(&digest, &serialized)?;
        bump_state(h, NodeState::Written);
        trace!(%digest, len = serialized.len(), "flushed node");
        if let Some(cache) = &base.cache {
            cache.put(nibs, digest, &serialized);
        }
    }
    bump_state(h, NodeState::Flushed);
    Ok(())
}

fn bump_state<V>(h: &NodeHandle<V>, state: NodeState) {
    if let Some(nb) = h.write().base_mut() {
        if nb.state < state {
            nb.state = state;
        }
    }
}

/// Replaces fully-flushed subtrees with plain hash references, releasing the
/// realized nodes. Unchanged subtrees keep their handles.
pub(crate) fn compact<V: TrieValue>(h: &NodeHandle<V>) -> NodeHandle<V> {
    let guard = h.read();
    let node = &*guard;
    if let Some(nb) = node.base() {
        if nb.state == NodeState::Flushed {
            if let Some(digest) = nb.digest {
                return handle(Node::HashRef(digest));
            }
        }
    }
    match node {
        Node::Leaf { .. } | Node::HashRef(_) => h.clone(),
        Node::Extension { base, path, next } => {
            let new_next = compact(next);
            if Arc::ptr_eq(&new_next, next) {
                h.clone()
            } else {
                handle(Node::Extension { base: base.clone(), path: path.clone(), next: new_next })
            }
        }
        Node::Branch { base, children, value } => {
            let mut changed = false;
            let mut compacted: [Option<NodeHandle<V>>; 16] = Default::default();
            for (slot, child) in compacted.iter_mut().zip(children.iter()) {
                *slot = child.as_ref().map(|child| {
                    let new_child = compact(child);
                    if !Arc::ptr_eq(&new_child, child) {
                        changed = true;
                    }
                    new_child
                });
            }
            if changed {
                handle(Node::Branch { base: base.clone(), children: compacted, value: value.clone() })
            } else {
                h.clone()
            }
        }
    }
}
