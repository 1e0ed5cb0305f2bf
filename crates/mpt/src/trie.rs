//! Mutable and immutable trie surfaces.
//!
//! A [`Mutable`] accepts writes; [`Mutable::get_snapshot`] freezes the
//! current tree into an [`Immutable`] version that can be hashed, proven,
//! iterated and flushed. The snapshot and the mutable trie share frozen
//! nodes; further writes copy on write, so old versions never change.

use std::sync::Arc;

use alloy_primitives::B256;
use bytes::Bytes;
use tracing::debug;

use crate::cache::NodeCache;
use crate::hp::{self, Nibbles};
use crate::iter::TrieIterator;
use crate::node::{self, handle, new_leaf, MptBase, Node, NodeBase, NodeHandle, NodeState};
use crate::store::BackingStore;
use crate::value::TrieValue;
use crate::{Error, HashKind};

/// Writable trie version. Single writer: mutators take `&mut self`.
#[derive(Debug)]
pub struct Mutable<V: TrieValue = Bytes> {
    pub(crate) base: MptBase,
    pub(crate) root: Option<NodeHandle<V>>,
}

/// Frozen trie version. Cheap to clone; all methods take `&self` and the
/// logical mapping never changes (nodes may still realize lazily and cache
/// their digests).
#[derive(Clone, Debug)]
pub struct Immutable<V: TrieValue = Bytes> {
    pub(crate) base: MptBase,
    pub(crate) root: Option<NodeHandle<V>>,
}

impl<V: TrieValue> Mutable<V> {
    /// Empty trie over `store`.
    pub fn new(store: Arc<dyn BackingStore>, hash: HashKind) -> Self {
        Self { base: MptBase { store, hash, cache: None }, root: None }
    }

    /// Reopens the trie whose root digest is `root`. Nothing is loaded until
    /// the first lookup descends.
    pub fn with_root(store: Arc<dyn BackingStore>, hash: HashKind, root: B256) -> Self {
        Self {
            base: MptBase { store, hash, cache: None },
            root: Some(handle(Node::HashRef(root))),
        }
    }

    /// Attaches a node cache shared by every version derived from this trie.
    pub fn attach_cache(mut self, cache: Arc<NodeCache>) -> Self {
        self.base.cache = Some(cache);
        self
    }

    /// Looks up `key`. Reads never change the logical mapping but may
    /// realize nodes along the way.
    pub fn get(&self, key: &[u8]) -> Result<Option<V>, Error> {
        match &self.root {
            Some(root) => get_at(&self.base, root, &hp::to_nibs(key), 0),
            None => Ok(None),
        }
    }

    /// Binds `key` to `value`, returning the previous value. Setting the
    /// value a key already has is a no-op that rebuilds nothing.
    pub fn set(&mut self, key: &[u8], value: V) -> Result<Option<V>, Error> {
        if value.to_bytes().is_empty() {
            return Err(Error::InvalidArgument("empty value"));
        }
        let nibs = hp::to_nibs(key);
        let (new_root, _, old) = set_at(&self.base, self.root.as_ref(), &nibs, 0, value)?;
        self.root = Some(new_root);
        Ok(old)
    }

    /// Removes `key`, returning the value it had. Absent keys are a no-op.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<V>, Error> {
        let Some(root) = self.root.clone() else { return Ok(None) };
        let nibs = hp::to_nibs(key);
        let (new_root, _, old) = delete_at(&self.base, &root, &nibs, 0)?;
        self.root = new_root;
        Ok(old)
    }

    /// Freezes the current contents into an immutable version. The mutable
    /// trie stays usable; subsequent writes copy on write.
    pub fn get_snapshot(&mut self) -> Immutable<V> {
        if let Some(root) = &self.root {
            node::freeze(root);
        }
        Immutable { base: self.base.clone(), root: self.root.clone() }
    }

    /// Discards all uncommitted changes and adopts `snapshot` as the new
    /// baseline. The snapshot must come from the same store and hash.
    pub fn reset(&mut self, snapshot: &Immutable<V>) -> Result<(), Error> {
        if !self.base.compatible(&snapshot.base) {
            return Err(Error::InvalidArgument("snapshot belongs to a different store"));
        }
        self.root = snapshot.root.clone();
        Ok(())
    }

    /// Drops realized copies of fully-flushed subtrees, keeping only their
    /// hash references. Purely a memory release.
    pub fn clear_cache(&mut self) {
        if let Some(root) = &self.root {
            self.root = Some(node::compact(root));
        }
    }
}

impl<V: TrieValue> Immutable<V> {
    /// Opens the immutable view of the trie whose root digest is `root`.
    pub fn with_root(store: Arc<dyn BackingStore>, hash: HashKind, root: B256) -> Self {
        Self {
            base: MptBase { store, hash, cache: None },
            root: Some(handle(Node::HashRef(root))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Looks up `key` in this version.
    pub fn get(&self, key: &[u8]) -> Result<Option<V>, Error> {
        match &self.root {
            Some(root) => get_at(&self.base, root, &hp::to_nibs(key), 0),
            None => Ok(None),
        }
    }

    /// Root digest committing to the full contents. `None` for the empty
    /// trie. Computing it hashes the tree bottom-up; results are cached.
    pub fn root_hash(&self) -> Result<Option<B256>, Error> {
        match &self.root {
            Some(root) => node::node_digest(&self.base, root).map(Some),
            None => Ok(None),
        }
    }

    /// Persists every node of this version to the backing store. Idempotent;
    /// a failure partway leaves a restartable prefix behind (nodes are
    /// written children-first, so no stored node ever dangles).
    pub fn flush(&self) -> Result<(), Error> {
        let Some(root) = &self.root else { return Ok(()) };
        let digest = node::node_digest(&self.base, root)?;
        let mut nibs = Vec::new();
        node::flush_node(&self.base, root, &mut nibs)?;
        debug!(root = %digest, "flushed trie");
        Ok(())
    }

    /// Opens a new writable version on top of this snapshot.
    pub fn to_mutable(&self) -> Mutable<V> {
        Mutable { base: self.base.clone(), root: self.root.clone() }
    }

    /// Whether both versions hold the same contents. Without `exact` this
    /// only consults shared handles and already-computed digests and says
    /// `false` when it cannot tell; with `exact` it hashes both roots.
    pub fn equal(&self, other: &Self, exact: bool) -> Result<bool, Error> {
        if !self.base.compatible(&other.base) {
            return Ok(false);
        }
        match (&self.root, &other.root) {
            (None, None) => Ok(true),
            (Some(a), Some(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Ok(true);
                }
                if exact {
                    Ok(node::node_digest(&self.base, a)? == node::node_digest(&other.base, b)?)
                } else {
                    match (cached_digest(a), cached_digest(b)) {
                        (Some(da), Some(db)) => Ok(da == db),
                        _ => Ok(false),
                    }
                }
            }
            _ => Ok(false),
        }
    }

    /// Iterates all entries in ascending key order.
    pub fn iter(&self) -> TrieIterator<V> {
        TrieIterator::new(self.base.clone(), self.root.clone(), Nibbles::new())
    }

    /// Iterates entries whose key starts with `prefix`, in ascending order,
    /// descending only into the matching subtree.
    pub fn filtered(&self, prefix: &[u8]) -> TrieIterator<V> {
        TrieIterator::new(self.base.clone(), self.root.clone(), hp::to_nibs(prefix))
    }
}

fn cached_digest<V: TrieValue>(h: &NodeHandle<V>) -> Option<B256> {
    match &*h.read() {
        Node::HashRef(digest) => Some(*digest),
        node => node.base().and_then(|nb| nb.digest),
    }
}

fn get_at<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    nibs: &[u8],
    depth: usize,
) -> Result<Option<V>, Error> {
    node::realize(base, h, &nibs[..depth])?;
    let rem = &nibs[depth..];
    let guard = h.read();
    match &*guard {
        Node::Leaf { path, value, .. } => Ok((path.as_slice() == rem).then(|| value.clone())),
        Node::Extension { path, next, .. } => {
            if !rem.starts_with(path) {
                return Ok(None);
            }
            let step = path.len();
            let next = next.clone();
            drop(guard);
            get_at(base, &next, nibs, depth + step)
        }
        Node::Branch { children, value, .. } => {
            if rem.is_empty() {
                return Ok(value.clone());
            }
            let Some(child) = children[rem[0] as usize].clone() else { return Ok(None) };
            drop(guard);
            get_at(base, &child, nibs, depth + 1)
        }
        Node::HashRef(_) => Err(Error::Internal("unrealized node after realize")),
    }
}

/// Builds the branch produced by a split, wrapped in an extension when a
/// common prefix remains.
fn branch_or_extension<V: TrieValue>(
    prefix: &[u8],
    children: [Option<NodeHandle<V>>; 16],
    value: Option<V>,
) -> NodeHandle<V> {
    let branch = handle(Node::Branch { base: NodeBase::default(), children, value });
    if prefix.is_empty() {
        branch
    } else {
        handle(Node::Extension {
            base: NodeBase::default(),
            path: Nibbles::from_slice(prefix),
            next: branch,
        })
    }
}

/// Inserts `value` at `nibs[depth..]` below `h`, returning the replacement
/// handle, whether anything changed, and the previous value. Frozen nodes
/// are never touched: a changed path is rebuilt from fresh Dirty nodes,
/// while Dirty nodes update in place.
fn set_at<V: TrieValue>(
    base: &MptBase,
    h: Option<&NodeHandle<V>>,
    nibs: &[u8],
    depth: usize,
    value: V,
) -> Result<(NodeHandle<V>, bool, Option<V>), Error> {
    let Some(h) = h else {
        return Ok((handle(new_leaf(Nibbles::from_slice(&nibs[depth..]), value)), true, None));
    };
    node::realize(base, h, &nibs[..depth])?;
    let rem = &nibs[depth..];
    let guard = h.read();
    match &*guard {
        Node::Leaf { base: nb, path, value: old } => {
            if path.as_slice() == rem {
                let old = old.clone();
                if old.value_eq(&value) {
                    return Ok((h.clone(), false, Some(old)));
                }
                if nb.state == NodeState::Dirty {
                    drop(guard);
                    if let Node::Leaf { value: slot, .. } = &mut *h.write() {
                        *slot = value;
                    }
                    return Ok((h.clone(), true, Some(old)));
                }
                return Ok((handle(new_leaf(Nibbles::from_slice(rem), value)), true, Some(old)));
            }
            // keys diverge: split into a branch at the fork point
            let common = hp::lcp(path, rem);
            let old_path = path.clone();
            let old_value = old.clone();
            drop(guard);
            let mut children: [Option<NodeHandle<V>>; 16] = Default::default();
            let mut branch_value = None;
            if common == old_path.len() {
                branch_value = Some(old_value);
            } else {
                children[old_path[common] as usize] = Some(handle(new_leaf(
                    Nibbles::from_slice(&old_path[common + 1..]),
                    old_value,
                )));
            }
            if common == rem.len() {
                branch_value = Some(value);
            } else {
                children[rem[common] as usize] =
                    Some(handle(new_leaf(Nibbles::from_slice(&rem[common + 1..]), value)));
            }
            Ok((branch_or_extension(&rem[..common], children, branch_value), true, None))
        }
        Node::Extension { base: nb, path, next } => {
            let common = hp::lcp(path, rem);
            if common == path.len() {
                // key continues below the extension
                let dirty = nb.state == NodeState::Dirty;
                let path = path.clone();
                let next = next.clone();
                drop(guard);
                let (new_next, changed, old) =
                    set_at(base, Some(&next), nibs, depth + path.len(), value)?;
                if !changed {
                    return Ok((h.clone(), false, old));
                }
                if dirty {
                    if let Node::Extension { next: slot, .. } = &mut *h.write() {
                        *slot = new_next;
                    }
                    return Ok((h.clone(), true, old));
                }
                return Ok((
                    handle(Node::Extension { base: NodeBase::default(), path, next: new_next }),
                    true,
                    old,
                ));
            }
            // key forks inside the extension path
            let path = path.clone();
            let next = next.clone();
            drop(guard);
            let mut children: [Option<NodeHandle<V>>; 16] = Default::default();
            let mut branch_value = None;
            let tail = &path[common + 1..];
            children[path[common] as usize] = Some(if tail.is_empty() {
                next
            } else {
                handle(Node::Extension {
                    base: NodeBase::default(),
                    path: Nibbles::from_slice(tail),
                    next,
                })
            });
            if common == rem.len() {
                branch_value = Some(value);
            } else {
                children[rem[common] as usize] =
                    Some(handle(new_leaf(Nibbles::from_slice(&rem[common + 1..]), value)));
            }
            Ok((branch_or_extension(&rem[..common], children, branch_value), true, None))
        }
        Node::Branch { base: nb, children, value: branch_value } => {
            let dirty = nb.state == NodeState::Dirty;
            if rem.is_empty() {
                // key terminates exactly here
                let old = branch_value.clone();
                if let Some(old) = &old {
                    if old.value_eq(&value) {
                        return Ok((h.clone(), false, Some(old.clone())));
                    }
                }
                if dirty {
                    drop(guard);
                    if let Node::Branch { value: slot, .. } = &mut *h.write() {
                        *slot = Some(value);
                    }
                    return Ok((h.clone(), true, old));
                }
                let children = children.clone();
                drop(guard);
                return Ok((
                    handle(Node::Branch {
                        base: NodeBase::default(),
                        children,
                        value: Some(value),
                    }),
                    true,
                    old,
                ));
            }
            let idx = rem[0] as usize;
            let child = children[idx].clone();
            let frozen_copy =
                if dirty { None } else { Some((children.clone(), branch_value.clone())) };
            drop(guard);
            let (new_child, changed, old) = set_at(base, child.as_ref(), nibs, depth + 1, value)?;
            if !changed {
                return Ok((h.clone(), false, old));
            }
            match frozen_copy {
                None => {
                    if let Node::Branch { children, .. } = &mut *h.write() {
                        children[idx] = Some(new_child);
                    }
                    Ok((h.clone(), true, old))
                }
                Some((mut children, branch_value)) => {
                    children[idx] = Some(new_child);
                    Ok((
                        handle(Node::Branch {
                            base: NodeBase::default(),
                            children,
                            value: branch_value,
                        }),
                        true,
                        old,
                    ))
                }
            }
        }
        Node::HashRef(_) => Err(Error::Internal("unrealized node after realize")),
    }
}

/// What a collapsing branch or shortened extension folds into.
enum Collapsed<V: TrieValue> {
    Leaf(Nibbles, V),
    Extension(Nibbles, NodeHandle<V>),
    Branch,
}

fn classify<V: TrieValue>(h: &NodeHandle<V>) -> Result<Collapsed<V>, Error> {
    match &*h.read() {
        Node::Leaf { path, value, .. } => Ok(Collapsed::Leaf(path.clone(), value.clone())),
        Node::Extension { path, next, .. } => Ok(Collapsed::Extension(path.clone(), next.clone())),
        Node::Branch { .. } => Ok(Collapsed::Branch),
        Node::HashRef(_) => Err(Error::Internal("classifying an unrealized node")),
    }
}

/// Prepends `prefix` to `child`, absorbing it when the child is itself a
/// leaf or extension so the no-extension-chain invariants hold.
fn merge_prefix<V: TrieValue>(prefix: &[u8], child: NodeHandle<V>) -> Result<NodeHandle<V>, Error> {
    match classify(&child)? {
        Collapsed::Leaf(cpath, value) => {
            let mut path = Nibbles::from_slice(prefix);
            path.extend_from_slice(&cpath);
            Ok(handle(new_leaf(path, value)))
        }
        Collapsed::Extension(cpath, next) => {
            let mut path = Nibbles::from_slice(prefix);
            path.extend_from_slice(&cpath);
            Ok(handle(Node::Extension { base: NodeBase::default(), path, next }))
        }
        Collapsed::Branch => Ok(handle(Node::Extension {
            base: NodeBase::default(),
            path: Nibbles::from_slice(prefix),
            next: child,
        })),
    }
}

/// Removes `nibs[depth..]` below `h`. Returns the replacement handle (`None`
/// when the subtree vanished), whether anything changed, and the removed
/// value.
fn delete_at<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    nibs: &[u8],
    depth: usize,
) -> Result<(Option<NodeHandle<V>>, bool, Option<V>), Error> {
    node::realize(base, h, &nibs[..depth])?;
    let rem = &nibs[depth..];
    let guard = h.read();
    match &*guard {
        Node::Leaf { path, value, .. } => {
            if path.as_slice() == rem {
                Ok((None, true, Some(value.clone())))
            } else {
                Ok((Some(h.clone()), false, None))
            }
        }
        Node::Extension { path, next, .. } => {
            if !rem.starts_with(path) {
                return Ok((Some(h.clone()), false, None));
            }
            let path = path.clone();
            let next = next.clone();
            drop(guard);
            let (new_next, changed, old) = delete_at(base, &next, nibs, depth + path.len())?;
            if !changed {
                return Ok((Some(h.clone()), false, old));
            }
            // the child can only have collapsed, never vanished: a branch
            // keeps at least one occupant after losing one of two or more
            let new_next = new_next.ok_or(Error::Internal("extension target vanished"))?;
            Ok((Some(merge_prefix(&path, new_next)?), true, old))
        }
        Node::Branch { base: nb, children, value: branch_value } => {
            let dirty = nb.state == NodeState::Dirty;
            if rem.is_empty() {
                if branch_value.is_none() {
                    return Ok((Some(h.clone()), false, None));
                }
                let old = branch_value.clone();
                let children = children.clone();
                drop(guard);
                return collapse_branch(base, h, children, None, dirty, old, nibs, depth);
            }
            let idx = rem[0] as usize;
            let Some(child) = children[idx].clone() else {
                return Ok((Some(h.clone()), false, None));
            };
            let children = children.clone();
            let branch_value = branch_value.clone();
            drop(guard);
            let (new_child, changed, old) = delete_at(base, &child, nibs, depth + 1)?;
            if !changed {
                return Ok((Some(h.clone()), false, old));
            }
            let mut children = children;
            children[idx] = new_child;
            collapse_branch(base, h, children, branch_value, dirty, old, nibs, depth)
        }
        Node::HashRef(_) => Err(Error::Internal("unrealized node after realize")),
    }
}

/// Rebuilds a branch after a removal, folding it away when a single
/// occupant remains.
#[allow(clippy::too_many_arguments)]
fn collapse_branch<V: TrieValue>(
    base: &MptBase,
    h: &NodeHandle<V>,
    children: [Option<NodeHandle<V>>; 16],
    value: Option<V>,
    dirty: bool,
    old: Option<V>,
    nibs: &[u8],
    depth: usize,
) -> Result<(Option<NodeHandle<V>>, bool, Option<V>), Error> {
    let occupied: Vec<usize> =
        children.iter().enumerate().filter_map(|(i, c)| c.as_ref().map(|_| i)).collect();
    match occupied.len() + usize::from(value.is_some()) {
        0 => Err(Error::Internal("branch lost its last occupant")),
        1 => {
            if let Some(value) = value {
                return Ok((Some(handle(new_leaf(Nibbles::new(), value))), true, old));
            }
            let idx = occupied[0];
            let survivor =
                children[idx].clone().ok_or(Error::Internal("occupied slot is empty"))?;
            let mut survivor_path = Vec::with_capacity(depth + 1);
            survivor_path.extend_from_slice(&nibs[..depth]);
            survivor_path.push(idx as u8);
            node::realize(base, &survivor, &survivor_path)?;
            Ok((Some(merge_prefix(&[idx as u8], survivor)?), true, old))
        }
        _ => {
            if dirty {
                if let Node::Branch { children: slot, value: vslot, .. } = &mut *h.write() {
                    *slot = children;
                    *vslot = value;
                }
                Ok((Some(h.clone()), true, old))
            } else {
                Ok((
                    Some(handle(Node::Branch { base: NodeBase::default(), children, value })),
                    true,
                    old,
                ))
            }
        }
    }
}
