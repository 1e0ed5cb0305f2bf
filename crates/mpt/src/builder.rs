//! Assembling a trie's node set from an external peer.
//!
//! [`MerkleBuilder`] tracks outstanding node digests. The host pumps it:
//! drain [`MerkleBuilder::unresolved`], fetch those blobs elsewhere, feed
//! them back through [`MerkleBuilder::on_data`]. Delivered bytes are matched
//! to requests by their computed digest, handed to the registered callbacks
//! (which typically request the children they discover), and persisted on
//! [`MerkleBuilder::flush`].

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use alloy_primitives::B256;
use bytes::Bytes;
use tracing::trace;

use crate::node::{self, MptBase, Node, NodeHandle};
use crate::store::BackingStore;
use crate::trie::Immutable;
use crate::value::TrieValue;
use crate::{Error, HashKind};

/// Callback invoked when the bytes for a requested digest arrive. Receives
/// the builder again so it can request whatever the bytes reference.
pub trait DataRequester: Send {
    fn on_data(&self, bytes: Bytes, builder: &mut MerkleBuilder) -> Result<(), Error>;
}

pub struct MerkleBuilder {
    store: Arc<dyn BackingStore>,
    hash: HashKind,
    handlers: HashMap<B256, Vec<Box<dyn DataRequester>>>,
    received: HashMap<B256, Bytes>,
}

impl MerkleBuilder {
    pub fn new(store: Arc<dyn BackingStore>, hash: HashKind) -> Self {
        Self { store, hash, handlers: HashMap::new(), received: HashMap::new() }
    }

    /// Registers interest in `digest`. If the bytes are already at hand
    /// (local store, or delivered earlier this session) the handler runs
    /// immediately; otherwise the digest joins the unresolved set.
    pub fn request(
        &mut self,
        digest: B256,
        handler: Box<dyn DataRequester>,
    ) -> Result<(), Error> {
        if let Some(bytes) = self.received.get(&digest).cloned() {
            return handler.on_data(bytes, self);
        }
        if let Some(bytes) = self.store.get(&digest)? {
            return handler.on_data(bytes, self);
        }
        trace!(%digest, "requested external node data");
        self.handlers.entry(digest).or_default().push(handler);
        Ok(())
    }

    /// Delivers externally fetched bytes. They are matched to the request by
    /// digest; unrequested data is rejected.
    pub fn on_data(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let digest = self.hash.digest(bytes);
        let Some(handlers) = self.handlers.remove(&digest) else {
            return Err(Error::InvalidArgument("data matches no outstanding request"));
        };
        let bytes = Bytes::copy_from_slice(bytes);
        self.received.insert(digest, bytes.clone());
        for handler in handlers {
            handler.on_data(bytes.clone(), self)?;
        }
        Ok(())
    }

    /// Digests still waiting for data.
    pub fn unresolved(&self) -> Vec<B256> {
        self.handlers.keys().copied().collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.handlers.len()
    }

    /// Persists everything delivered so far to the local store.
    pub fn flush(&self) -> Result<(), Error> {
        for (digest, bytes) in &self.received {
            self.store.put(digest, bytes)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MerkleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleBuilder")
            .field("unresolved", &self.handlers.len())
            .field("received", &self.received.len())
            .finish()
    }
}

/// Requester that decodes a delivered node and chases its children and
/// value dependencies.
struct NodeResolver<V> {
    base: MptBase,
    _value: PhantomData<fn() -> V>,
}

impl<V: TrieValue> NodeResolver<V> {
    fn boxed(base: MptBase) -> Box<dyn DataRequester> {
        Box::new(Self { base, _value: PhantomData })
    }
}

impl<V: TrieValue> DataRequester for NodeResolver<V> {
    fn on_data(&self, bytes: Bytes, builder: &mut MerkleBuilder) -> Result<(), Error> {
        let node: Node<V> = node::decode_node(&self.base, None, &bytes)?;
        match &node {
            Node::Leaf { value, .. } => value.resolve(builder)?,
            Node::Extension { next, .. } => {
                request_subtree(&self.base, next, builder)?;
            }
            Node::Branch { children, value, .. } => {
                for child in children.iter().flatten() {
                    request_subtree(&self.base, child, builder)?;
                }
                if let Some(value) = value {
                    value.resolve(builder)?;
                }
            }
            Node::HashRef(_) => return Err(Error::Internal("decoded node is a reference")),
        }
        Ok(())
    }
}

/// Requests `h` and everything below it: digests go through the builder,
/// inlined nodes recurse directly.
fn request_subtree<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    builder: &mut MerkleBuilder,
) -> Result<(), Error> {
    let guard = h.read();
    match &*guard {
        Node::HashRef(digest) => {
            let digest = *digest;
            drop(guard);
            builder.request(digest, NodeResolver::<V>::boxed(base.clone()))
        }
        Node::Leaf { value, .. } => value.resolve(builder),
        Node::Extension { next, .. } => {
            let next = next.clone();
            drop(guard);
            request_subtree(base, &next, builder)
        }
        Node::Branch { children, value, .. } => {
            let children: Vec<_> = children.iter().flatten().cloned().collect();
            let value = value.clone();
            drop(guard);
            for child in children {
                request_subtree(base, &child, builder)?;
            }
            if let Some(value) = value {
                value.resolve(builder)?;
            }
            Ok(())
        }
    }
}

impl<V: TrieValue> Immutable<V> {
    /// Requests every node of this version that the local store is missing.
    /// Pump the builder until [`MerkleBuilder::unresolved_count`] reaches
    /// zero, then [`MerkleBuilder::flush`] it; afterwards this version reads
    /// entirely from the local store.
    pub fn resolve(&self, builder: &mut MerkleBuilder) -> Result<(), Error> {
        let Some(root) = &self.root else { return Ok(()) };
        resolve_node(&self.base, root, builder, &mut Vec::new())
    }
}

fn resolve_node<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    builder: &mut MerkleBuilder,
    nibs: &mut Vec<u8>,
) -> Result<(), Error> {
    match node::realize(base, h, nibs) {
        Ok(()) => {}
        Err(Error::StoreMiss(digest)) => {
            return builder.request(digest, NodeResolver::<V>::boxed(base.clone()));
        }
        Err(err) => return Err(err),
    }
    let (children, values): (Vec<(Vec<u8>, NodeHandle<V>)>, Vec<V>) = {
        let guard = h.read();
        match &*guard {
            Node::Leaf { value, .. } => (Vec::new(), vec![value.clone()]),
            Node::Extension { path, next, .. } => {
                (vec![(path.to_vec(), next.clone())], Vec::new())
            }
            Node::Branch { children, value, .. } => {
                let mut kids = Vec::new();
                for (i, child) in children.iter().enumerate() {
                    if let Some(child) = child {
                        kids.push((vec![i as u8], child.clone()));
                    }
                }
                (kids, value.iter().cloned().collect())
            }
            Node::HashRef(_) => return Err(Error::Internal("unrealized node after realize")),
        }
    };
    let depth = nibs.len();
    for (segment, child) in children {
        nibs.extend_from_slice(&segment);
        let res = resolve_node(base, &child, builder, nibs);
        nibs.truncate(depth);
        res?;
    }
    for value in values {
        value.resolve(builder)?;
    }
    Ok(())
}
