//! Depth-bounded node cache keyed by nibble-path prefix.
//!
//! The top of a trie is hit by every operation, so the serializations of
//! nodes living in the first `depth` levels are kept in a flat slot array:
//! slot 0 is the root, the children of slot `i` are slots `16*i + n + 1`.
//! Entries are verified against the digest they were stored under, which
//! makes sharing one cache across versions safe: a stale slot simply misses.

use std::fmt;

use alloy_primitives::B256;
use bytes::Bytes;
use parking_lot::RwLock;

/// Serializations above this size are not worth caching.
const MAX_CACHED_SIZE: usize = 532;

pub struct NodeCache {
    depth: usize,
    slots: Vec<RwLock<Option<(B256, Bytes)>>>,
}

impl NodeCache {
    /// Creates a cache covering nodes whose nibble path is shorter than
    /// `depth`. Slot count is `(16^depth - 1) / 15`; depth 5 is ~70k slots.
    pub fn new(depth: usize) -> Self {
        assert!(depth <= 6, "cache depth above 6 is pure memory waste");
        let len = (16usize.pow(depth as u32) - 1) / 15;
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || RwLock::new(None));
        Self { depth, slots }
    }

    fn index(&self, nibs: &[u8]) -> Option<usize> {
        if nibs.len() >= self.depth {
            return None;
        }
        let mut idx = 0usize;
        for &nib in nibs {
            idx = idx * 16 + nib as usize + 1;
        }
        Some(idx)
    }

    /// Looks up the serialization cached for the node at `nibs`, accepting it
    /// only when it was stored under the same `digest`.
    pub(crate) fn get(&self, nibs: &[u8], digest: &B256) -> Option<Bytes> {
        let slot = self.slots[self.index(nibs)?].read();
        match &*slot {
            Some((cached, bytes)) if cached == digest => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Publishes a node serialization for the path `nibs`.
    pub(crate) fn put(&self, nibs: &[u8], digest: B256, bytes: &Bytes) {
        if bytes.len() > MAX_CACHED_SIZE {
            return;
        }
        if let Some(idx) = self.index(nibs) {
            *self.slots[idx].write() = Some((digest, bytes.clone()));
        }
    }
}

impl fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCache").field("depth", &self.depth).field("slots", &self.slots.len()).finish()
    }
}
