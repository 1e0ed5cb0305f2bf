//! Backing-store contract and the in-memory reference implementation.

use std::collections::HashMap;
use std::fmt;

use alloy_primitives::B256;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::Error;

/// Content-addressed node storage: `digest -> serialized node`.
///
/// The store never interprets the bytes it holds. `get` of an absent digest
/// is `Ok(None)`; operational failures map to [`Error::Io`].
pub trait BackingStore: fmt::Debug + Send + Sync {
    /// Fetches the bytes stored under `digest`, if any.
    fn get(&self, digest: &B256) -> Result<Option<Bytes>, Error>;

    /// Stores `bytes` under `digest`. Writing the same digest twice is a
    /// no-op by construction (the bytes are identical).
    fn put(&self, digest: &B256, bytes: &[u8]) -> Result<(), Error>;
}

/// In-memory [`BackingStore`] backed by a hash map.
#[derive(Debug, Default)]
pub struct MemStore {
    map: RwLock<HashMap<B256, Bytes>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Whether `digest` is present.
    pub fn contains(&self, digest: &B256) -> bool {
        self.map.read().contains_key(digest)
    }
}

impl BackingStore for MemStore {
    fn get(&self, digest: &B256) -> Result<Option<Bytes>, Error> {
        Ok(self.map.read().get(digest).cloned())
    }

    fn put(&self, digest: &B256, bytes: &[u8]) -> Result<(), Error> {
        self.map.write().insert(*digest, Bytes::copy_from_slice(bytes));
        Ok(())
    }
}
