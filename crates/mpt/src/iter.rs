//! In-order traversal over a trie version.
//!
//! The iterator keeps an explicit stack of pending nodes. Children of a
//! branch are pushed highest nibble first so the lowest one pops next, and a
//! branch's own value is yielded before any of its children, which gives
//! ascending byte-wise key order. Nodes realize lazily as the walk reaches
//! them; a store miss surfaces as the `Err` element at that position.

use crate::hp::{self, Nibbles};
use crate::node::{self, MptBase, Node, NodeHandle};
use crate::value::TrieValue;
use crate::Error;

pub struct TrieIterator<V: TrieValue> {
    base: MptBase,
    prefix: Nibbles,
    stack: Vec<(Nibbles, NodeHandle<V>)>,
}

impl<V: TrieValue> TrieIterator<V> {
    pub(crate) fn new(base: MptBase, root: Option<NodeHandle<V>>, prefix: Nibbles) -> Self {
        let stack = match root {
            Some(root) => vec![(Nibbles::new(), root)],
            None => Vec::new(),
        };
        Self { base, prefix, stack }
    }

    /// Whether a node at `path` can still lead to keys under the prefix.
    fn overlaps(&self, path: &[u8]) -> bool {
        let n = path.len().min(self.prefix.len());
        path[..n] == self.prefix[..n]
    }

    /// Whether the full key at `path` is under the prefix.
    fn matches(&self, path: &[u8]) -> bool {
        path.starts_with(&self.prefix)
    }

    fn step(&mut self) -> Result<Option<(Vec<u8>, V)>, Error> {
        while let Some((path, h)) = self.stack.pop() {
            node::realize(&self.base, &h, &path)?;
            let guard = h.read();
            match &*guard {
                Node::Leaf { path: suffix, value, .. } => {
                    let mut full = path;
                    full.extend_from_slice(suffix);
                    if self.matches(&full) {
                        return Ok(Some((hp::nibs_to_bytes(&full)?, value.clone())));
                    }
                }
                Node::Extension { path: segment, next, .. } => {
                    let mut full = path;
                    full.extend_from_slice(segment);
                    if self.overlaps(&full) {
                        self.stack.push((full, next.clone()));
                    }
                }
                Node::Branch { children, value, .. } => {
                    for (i, child) in children.iter().enumerate().rev() {
                        if let Some(child) = child {
                            let mut full = path.clone();
                            full.push(i as u8);
                            if self.overlaps(&full) {
                                self.stack.push((full, child.clone()));
                            }
                        }
                    }
                    if let Some(value) = value {
                        if self.matches(&path) {
                            return Ok(Some((hp::nibs_to_bytes(&path)?, value.clone())));
                        }
                    }
                }
                Node::HashRef(_) => return Err(Error::Internal("unrealized node after realize")),
            }
        }
        Ok(None)
    }
}

impl<V: TrieValue> Iterator for TrieIterator<V> {
    type Item = Result<(Vec<u8>, V), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                // stop after surfacing the failure once
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}

impl<V: TrieValue> std::fmt::Debug for TrieIterator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieIterator")
            .field("prefix", &self.prefix)
            .field("pending", &self.stack.len())
            .finish()
    }
}
