//! Persistent, versioned, authenticated key/value store built on a Merkle
//! Patricia Trie.
//!
//! The store maps arbitrary byte keys to values and commits to its full
//! contents with a single 32-byte root digest. Versions are cheap: a
//! [`Mutable`] accepts writes with copy-on-write over the frozen nodes it
//! shares with earlier [`Immutable`] snapshots, so any number of versions
//! coexist over one backing store. Nodes load lazily from the
//! [`BackingStore`] as lookups descend, and [`Immutable::get_proof`] /
//! [`Immutable::prove`] produce and check Merkle proofs for single keys.

use alloy_primitives::{keccak256, B256};

mod builder;
mod cache;
mod codec;
mod hp;
mod iter;
mod node;
mod proof;
mod store;
mod trie;
mod value;

pub use builder::{DataRequester, MerkleBuilder};
pub use cache::NodeCache;
pub use iter::TrieIterator;
pub use store::{BackingStore, MemStore};
pub use trie::{Immutable, Mutable};
pub use value::TrieValue;

/// Errors surfaced by trie operations.
///
/// Operations fail without mutating logical state; a failed `set`/`delete`
/// leaves the [`Mutable`] exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced node (or value dependency) is absent from the backing store.
    #[error("backing store has no entry for {0}")]
    StoreMiss(B256),
    /// A stored byte sequence is not a canonical encoding.
    #[error("rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// A stored byte sequence decoded but does not describe a valid node.
    #[error("corrupted node: {0}")]
    Corrupted(&'static str),
    /// The caller passed something unusable (empty value, foreign snapshot, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A proof does not verify against the root digest.
    #[error("invalid proof: {0}")]
    InvalidProof(&'static str),
    /// The backing store failed operationally.
    #[error("backing store i/o: {0}")]
    Io(String),
    /// An internal invariant was violated.
    #[error("internal: {0}")]
    Internal(&'static str),
}

/// Digest algorithm used for node references and the root hash.
///
/// Fixed per store at construction; mixing algorithms across a trie's nodes
/// would break every link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashKind {
    /// Keccak-256 (the Ethereum variant).
    #[default]
    Keccak256,
    /// FIPS-202 SHA3-256.
    Sha3,
}

impl HashKind {
    /// Hashes `bytes` with the selected algorithm.
    pub fn digest(&self, bytes: &[u8]) -> B256 {
        match self {
            Self::Keccak256 => keccak256(bytes),
            Self::Sha3 => {
                use sha3::{Digest, Sha3_256};
                B256::from_slice(&Sha3_256::digest(bytes))
            }
        }
    }
}
