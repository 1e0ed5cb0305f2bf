//! Leaf value abstraction.
//!
//! The trie core is generic over the value type. The plain byte store uses
//! `V = bytes::Bytes`; typed stores implement [`TrieValue`] for their own
//! object types so values deserialize lazily on access and can carry
//! dependencies of their own (persisted on [`TrieValue::flush`], declared on
//! [`TrieValue::resolve`]).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::builder::MerkleBuilder;
use crate::store::BackingStore;
use crate::Error;

pub trait TrieValue: Clone + fmt::Debug + Send + Sync + 'static {
    /// Rebuilds a value from its canonical serialization. `store` gives
    /// access to dependent blobs; implementations must not fail just because
    /// a dependency is absent (declare it via [`TrieValue::resolve`] instead).
    fn from_store(store: &Arc<dyn BackingStore>, bytes: &[u8]) -> Result<Self, Error>;

    /// Canonical serialization. Two values serializing to the same bytes are
    /// the same value as far as the root digest is concerned.
    fn to_bytes(&self) -> Bytes;

    /// Semantic equality, used to detect no-op `set` calls.
    fn value_eq(&self, other: &Self) -> bool;

    /// Persists any data owned by the value itself. Called during trie flush
    /// before the referencing node is written.
    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Requests any missing dependencies from `builder`.
    fn resolve(&self, builder: &mut MerkleBuilder) -> Result<(), Error> {
        let _ = builder;
        Ok(())
    }
}

impl TrieValue for Bytes {
    fn from_store(_store: &Arc<dyn BackingStore>, bytes: &[u8]) -> Result<Self, Error> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn to_bytes(&self) -> Bytes {
        self.clone()
    }

    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }
}
