use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy_primitives::{b256, B256};
use bytes::Bytes;
use hex_literal::hex;
use mpt_store::{
    BackingStore, Error, HashKind, Immutable, MemStore, MerkleBuilder, Mutable, NodeCache,
    TrieValue,
};

const S1_ROOT: B256 = b256!("8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3");
const S2_ROOT: B256 = b256!("d23786fb4a010da3ce639d66d5e904a11dbc02746d1ce25029e53290cabf28ab");
const S3_ROOT: B256 = b256!("5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84");

const S1_PAIRS: [(&[u8], &[u8]); 3] =
    [(b"doe", b"reindeer"), (b"dog", b"puppy"), (b"dogglesworth", b"cat")];

fn init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn value(v: &[u8]) -> Bytes {
    Bytes::copy_from_slice(v)
}

fn build(pairs: &[(&[u8], &[u8])]) -> Mutable {
    let mut trie = Mutable::new(Arc::new(MemStore::new()), HashKind::Keccak256);
    for (k, v) in pairs {
        trie.set(k, value(v)).unwrap();
    }
    trie
}

fn root(trie: &mut Mutable) -> B256 {
    trie.get_snapshot().root_hash().unwrap().unwrap()
}

#[test]
fn s1_three_keys_root() {
    init();
    // insertion order must not matter
    for order in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
        let mut trie = Mutable::new(Arc::new(MemStore::new()), HashKind::Keccak256);
        for i in order {
            let (k, v) = S1_PAIRS[i];
            trie.set(k, value(v)).unwrap();
        }
        assert_eq!(root(&mut trie), S1_ROOT, "order {order:?}");
        for (k, v) in S1_PAIRS {
            assert_eq!(trie.get(k).unwrap(), Some(value(v)));
        }
        assert_eq!(trie.get(b"dogg").unwrap(), None);
        assert_eq!(trie.get(b"").unwrap(), None);
    }
}

#[test]
fn s2_single_long_value() {
    let mut trie = build(&[(b"A", b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")]);
    assert_eq!(root(&mut trie), S2_ROOT);
}

#[test]
fn s3_mutation_sequence() {
    let mut trie = build(&[
        (b"do", b"verb"),
        (b"ether", b"wookiedoo"),
        (b"horse", b"stallion"),
        (b"shaman", b"horse"),
        (b"doge", b"coin"),
    ]);
    assert_eq!(trie.delete(b"ether").unwrap(), Some(value(b"wookiedoo")));
    trie.set(b"dog", value(b"puppy")).unwrap();
    assert_eq!(trie.delete(b"shaman").unwrap(), Some(value(b"horse")));
    assert_eq!(root(&mut trie), S3_ROOT);
}

#[test]
fn s4_delete_reverses() {
    let mut trie = build(&S1_PAIRS);
    assert_eq!(trie.delete(b"dogglesworth").unwrap(), Some(value(b"cat")));
    let two = root(&mut build(&[(b"dog", b"puppy"), (b"doe", b"reindeer")]));
    assert_eq!(root(&mut trie), two);

    // deleting the rest empties the trie completely
    trie.delete(b"doe").unwrap();
    trie.delete(b"dog").unwrap();
    let snapshot = trie.get_snapshot();
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.root_hash().unwrap(), None);
}

#[test]
fn s5_proof_roundtrip_and_tamper_rejection() {
    init();
    let mut trie = build(&S1_PAIRS);
    let snapshot = trie.get_snapshot();
    for (k, v) in S1_PAIRS {
        let proof = snapshot.get_proof(k).unwrap().expect("key is present");
        assert_eq!(snapshot.prove(k, &proof).unwrap(), Some(value(v)));

        // any single-byte corruption anywhere must be rejected
        for i in 0..proof.len() {
            for j in 0..proof[i].len() {
                let mut tampered: Vec<Bytes> = proof.clone();
                let mut bytes = tampered[i].to_vec();
                bytes[j] ^= 0x01;
                tampered[i] = Bytes::from(bytes);
                assert!(snapshot.prove(k, &tampered).is_err(), "entry {i} byte {j}");
            }
        }

        // dropping the last entry truncates the proof
        let truncated = &proof[..proof.len() - 1];
        assert!(matches!(snapshot.prove(k, truncated), Err(Error::InvalidProof(_))));
    }

    // absent key has no proof
    assert_eq!(snapshot.get_proof(b"dogg").unwrap(), None);
    // a valid proof for one key does not prove another
    let proof = snapshot.get_proof(b"doe").unwrap().unwrap();
    assert!(snapshot.prove(b"horse", &proof).is_err());
}

/// Store wrapper counting fetches, for observing lazy realization.
#[derive(Debug)]
struct CountingStore {
    inner: MemStore,
    gets: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self { inner: MemStore::new(), gets: AtomicUsize::new(0) }
    }
}

impl BackingStore for CountingStore {
    fn get(&self, digest: &B256) -> Result<Option<Bytes>, Error> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.inner.get(digest)
    }

    fn put(&self, digest: &B256, bytes: &[u8]) -> Result<(), Error> {
        self.inner.put(digest, bytes)
    }
}

#[test]
fn s6_lazy_realization() {
    init();
    let store = Arc::new(CountingStore::new());
    let mut trie = Mutable::new(store.clone(), HashKind::Keccak256);
    for (k, v) in S1_PAIRS {
        trie.set(k, value(v)).unwrap();
    }
    let snapshot = trie.get_snapshot();
    snapshot.flush().unwrap();
    let stored = store.inner.len();
    assert!(stored >= 2, "expected several persisted nodes, got {stored}");

    let reopened = Mutable::with_root(store.clone(), HashKind::Keccak256, S1_ROOT);
    store.gets.store(0, Ordering::Relaxed);
    assert_eq!(reopened.get(b"doe").unwrap(), Some(value(b"reindeer")));
    let fetched = store.gets.load(Ordering::Relaxed);
    assert!(fetched > 0);
    assert!(fetched < stored, "descent fetched {fetched} of {stored} nodes");

    // realized nodes stay realized; repeating the read hits the store no more
    assert_eq!(reopened.get(b"doe").unwrap(), Some(value(b"reindeer")));
    assert_eq!(store.gets.load(Ordering::Relaxed), fetched);
}

#[test]
fn missing_node_is_a_store_miss() {
    let trie: Mutable = Mutable::with_root(
        Arc::new(MemStore::new()),
        HashKind::Keccak256,
        B256::repeat_byte(0xab),
    );
    assert!(matches!(trie.get(b"anything"), Err(Error::StoreMiss(_))));
}

#[test]
fn empty_key_operations() {
    let mut trie = build(&[(b"dog", b"puppy")]);
    assert_eq!(trie.get(b"").unwrap(), None);
    trie.set(b"", value(b"root-value")).unwrap();
    assert_eq!(trie.get(b"").unwrap(), Some(value(b"root-value")));
    assert_eq!(trie.get(b"dog").unwrap(), Some(value(b"puppy")));
    assert_eq!(trie.delete(b"").unwrap(), Some(value(b"root-value")));
    assert_eq!(trie.get(b"").unwrap(), None);
    assert_eq!(root(&mut trie), root(&mut build(&[(b"dog", b"puppy")])));
}

#[test]
fn empty_value_is_rejected() {
    let mut trie = build(&[(b"dog", b"puppy")]);
    let before = root(&mut trie);
    assert!(matches!(trie.set(b"cat", Bytes::new()), Err(Error::InvalidArgument(_))));
    assert_eq!(root(&mut trie), before);
}

#[test]
fn single_entry_root_is_hashed() {
    let store = Arc::new(MemStore::new());
    let mut trie = Mutable::new(store.clone(), HashKind::Keccak256);
    trie.set(b"a", value(b"b")).unwrap();
    let snapshot = trie.get_snapshot();
    // tiny serialization, but the root always gets a digest
    let digest = snapshot.root_hash().unwrap().unwrap();
    snapshot.flush().unwrap();
    assert!(store.contains(&digest));
    // leaf [path "20 61", value "b"] in canonical list form
    assert_eq!(store.get(&digest).unwrap().unwrap().as_ref(), hex!("c482206162"));

    let reopened = Immutable::with_root(store, HashKind::Keccak256, digest);
    assert_eq!(reopened.get(b"a").unwrap(), Some(value(b"b")));
}

#[test]
fn structural_splits() {
    // all but the last nibble shared: extension straight into a branch
    let mut close = build(&[(b"dog", b"a"), (b"doh", b"b")]);
    assert_eq!(close.get(b"dog").unwrap(), Some(value(b"a")));
    assert_eq!(close.get(b"doh").unwrap(), Some(value(b"b")));
    let r = root(&mut close);
    assert_eq!(r, root(&mut build(&[(b"doh", b"b"), (b"dog", b"a")])));

    // no shared prefix: branch directly at the root
    let far = build(&[(b"axe", b"1"), (b"zoo", b"2")]);
    assert_eq!(far.get(b"axe").unwrap(), Some(value(b"1")));
    assert_eq!(far.get(b"zoo").unwrap(), Some(value(b"2")));

    // one key a strict prefix of the other: value lands inside a branch
    let nested = build(&[(b"do", b"verb"), (b"dog", b"puppy")]);
    assert_eq!(nested.get(b"do").unwrap(), Some(value(b"verb")));
    assert_eq!(nested.get(b"dog").unwrap(), Some(value(b"puppy")));
}

#[test]
fn branch_collapse_cases() {
    // every deletion must land on the same root as building the remaining
    // mapping from scratch
    let cases: [&[(&[u8], &[u8])]; 4] = [
        // survivor is a leaf: branch folds into a longer leaf
        &[(b"doe", b"reindeer"), (b"dog", b"puppy")],
        // survivor is a branch: fold produces an extension
        &[(b"dog", b"puppy"), (b"horse", b"stallion"), (b"house", b"brick")],
        // survivor is an extension: prefixes concatenate
        &[(b"dog", b"puppy"), (b"horsecart", b"wood"), (b"horseshoe", b"iron")],
        // only the branch value survives: fold produces a leaf
        &[(b"do", b"verb"), (b"dog", b"puppy")],
    ];
    for pairs in cases {
        for victim in 0..pairs.len() {
            let mut trie = build(pairs);
            let (k, v) = pairs[victim];
            assert_eq!(trie.delete(k).unwrap(), Some(value(v)));
            let remaining: Vec<_> =
                pairs.iter().enumerate().filter(|(i, _)| *i != victim).map(|(_, p)| *p).collect();
            assert_eq!(root(&mut trie), root(&mut build(&remaining)), "{pairs:?} minus {victim}");
            assert_eq!(trie.get(k).unwrap(), None);
        }
    }
}

#[test]
fn idempotent_set_and_noop_delete() {
    let mut trie = build(&S1_PAIRS);
    let before = root(&mut trie);

    assert_eq!(trie.set(b"dog", value(b"puppy")).unwrap(), Some(value(b"puppy")));
    assert_eq!(root(&mut trie), before);

    assert_eq!(trie.delete(b"absent").unwrap(), None);
    assert_eq!(root(&mut trie), before);
}

#[test]
fn snapshot_isolation_and_reset() {
    let mut trie = build(&S1_PAIRS);
    let snap1 = trie.get_snapshot();
    let root1 = snap1.root_hash().unwrap().unwrap();

    trie.set(b"dog", value(b"wolf")).unwrap();
    trie.delete(b"doe").unwrap();
    let snap2 = trie.get_snapshot();

    // the older version is untouched by later writes
    assert_eq!(snap1.get(b"dog").unwrap(), Some(value(b"puppy")));
    assert_eq!(snap1.get(b"doe").unwrap(), Some(value(b"reindeer")));
    assert_eq!(snap1.root_hash().unwrap(), Some(root1));
    assert_eq!(snap2.get(b"dog").unwrap(), Some(value(b"wolf")));
    assert_ne!(snap2.root_hash().unwrap(), Some(root1));

    // reset rewinds the mutable trie to the first version
    trie.reset(&snap1).unwrap();
    assert_eq!(root(&mut trie), root1);
    assert_eq!(trie.get(b"dog").unwrap(), Some(value(b"puppy")));

    // a snapshot from an unrelated store is refused
    let foreign = build(&S1_PAIRS).get_snapshot();
    assert!(matches!(trie.reset(&foreign), Err(Error::InvalidArgument(_))));
}

#[test]
fn snapshot_equality() {
    let mut trie = build(&S1_PAIRS);
    let a = trie.get_snapshot();
    let b = trie.get_snapshot();
    // same root handle
    assert!(a.equal(&b, false).unwrap());

    let mut second = a.to_mutable();
    second.set(b"dog", value(b"wolf")).unwrap();
    second.set(b"dog", value(b"puppy")).unwrap();
    let c = second.get_snapshot();
    // same contents behind different handles: only exact comparison can tell
    assert!(!a.equal(&c, false).unwrap());
    assert!(a.equal(&c, true).unwrap());

    let mut third = a.to_mutable();
    third.delete(b"doe").unwrap();
    let d = third.get_snapshot();
    assert!(!a.equal(&d, true).unwrap());
}

#[test]
fn concurrent_readers_share_a_snapshot() {
    init();
    let store = Arc::new(MemStore::new());
    let mut trie = Mutable::new(store.clone(), HashKind::Keccak256);
    for (k, v) in S1_PAIRS {
        trie.set(k, value(v)).unwrap();
    }

    // race the first digest computation on a freshly frozen snapshot
    let fresh = trie.get_snapshot();
    std::thread::scope(|s| {
        for _ in 0..8 {
            let fresh = fresh.clone();
            s.spawn(move || {
                assert_eq!(fresh.root_hash().unwrap(), Some(S1_ROOT));
            });
        }
    });
    fresh.flush().unwrap();

    // every reader realizes the very same node handles; the realized
    // structure is swapped in under the node locks, so racing readers
    // all see the one tree
    let snapshot: Immutable = Immutable::with_root(store, HashKind::Keccak256, S1_ROOT);
    std::thread::scope(|s| {
        for _ in 0..8 {
            let snapshot = snapshot.clone();
            s.spawn(move || {
                for (k, v) in S1_PAIRS {
                    assert_eq!(snapshot.get(k).unwrap(), Some(value(v)));
                }
                assert_eq!(snapshot.root_hash().unwrap(), Some(S1_ROOT));
                let entries: Vec<_> = snapshot.iter().collect::<Result<Vec<_>, _>>().unwrap();
                assert_eq!(entries.len(), S1_PAIRS.len());
            });
        }
    });
}

#[test]
fn flush_and_reopen() {
    init();
    let store = Arc::new(MemStore::new());
    let mut trie = Mutable::new(store.clone(), HashKind::Keccak256);
    for (k, v) in S1_PAIRS {
        trie.set(k, value(v)).unwrap();
    }
    let snapshot = trie.get_snapshot();
    let digest = snapshot.root_hash().unwrap().unwrap();
    snapshot.flush().unwrap();
    // flushing again is a no-op
    snapshot.flush().unwrap();

    let reopened = Immutable::with_root(store, HashKind::Keccak256, digest);
    for (k, v) in S1_PAIRS {
        assert_eq!(reopened.get(k).unwrap(), Some(value(v)));
    }
    assert_eq!(reopened.root_hash().unwrap(), Some(digest));
    assert!(reopened.equal(&snapshot, true).unwrap());
    assert_eq!(
        reopened.iter().collect::<Result<Vec<_>, _>>().unwrap().len(),
        S1_PAIRS.len()
    );
}

#[test]
fn iterator_yields_sorted_entries() {
    let words: [(&[u8], &[u8]); 8] = [
        (b"painting", b"place"),
        (b"guest", b"ship"),
        (b"mud", b"leave"),
        (b"paper", b"call"),
        (b"gate", b"boast"),
        (b"tongue", b"gain"),
        (b"pain", b"slip"),
        (b"p", b"top"),
    ];
    let mut trie = build(&words);
    let snapshot = trie.get_snapshot();

    let expected: BTreeMap<Vec<u8>, Bytes> =
        words.iter().map(|(k, v)| (k.to_vec(), value(v))).collect();
    let yielded: Vec<(Vec<u8>, Bytes)> =
        snapshot.iter().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(yielded.len(), expected.len());
    assert!(yielded.windows(2).all(|w| w[0].0 < w[1].0), "keys out of order");
    for (k, v) in &yielded {
        assert_eq!(expected.get(k), Some(v));
    }

    // branch values come before the keys below them
    let keys: Vec<Vec<u8>> = yielded.iter().map(|(k, _)| k.clone()).collect();
    let pain = keys.iter().position(|k| k == b"pain").unwrap();
    let painting = keys.iter().position(|k| k == b"painting").unwrap();
    assert!(pain < painting);
}

#[test]
fn iterator_prefix_filter() {
    let mut trie = build(&S1_PAIRS);
    let snapshot = trie.get_snapshot();

    let dogs: Vec<(Vec<u8>, Bytes)> =
        snapshot.filtered(b"dog").collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(
        dogs,
        vec![
            (b"dog".to_vec(), value(b"puppy")),
            (b"dogglesworth".to_vec(), value(b"cat")),
        ]
    );

    let none: Vec<_> = snapshot.filtered(b"cat").collect::<Result<Vec<_>, _>>().unwrap();
    assert!(none.is_empty());

    // empty prefix is the full iteration
    let all: Vec<_> = snapshot.filtered(b"").collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(all.len(), S1_PAIRS.len());
}

#[test]
fn iterator_surfaces_store_miss() {
    // an unflushed root digest over an empty store cannot iterate
    let orphan: Immutable =
        Immutable::with_root(Arc::new(MemStore::new()), HashKind::Keccak256, S1_ROOT);
    let items: Vec<_> = orphan.iter().collect();
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(Error::StoreMiss(_))));
}

#[test]
fn node_cache_transparency() {
    init();
    let store = Arc::new(MemStore::new());
    let cache = Arc::new(NodeCache::new(3));
    let mut cached = Mutable::new(store.clone(), HashKind::Keccak256).attach_cache(cache.clone());
    for (k, v) in S1_PAIRS {
        cached.set(k, value(v)).unwrap();
    }
    assert_eq!(root(&mut cached), S1_ROOT);
    cached.get_snapshot().flush().unwrap();

    // reads served through the cache agree with the plain path
    let reopened =
        Mutable::with_root(store, HashKind::Keccak256, S1_ROOT).attach_cache(cache);
    for (k, v) in S1_PAIRS {
        assert_eq!(reopened.get(k).unwrap(), Some(value(v)));
    }
}

#[test]
fn clear_cache_keeps_contents() {
    let store = Arc::new(MemStore::new());
    let mut trie = Mutable::new(store, HashKind::Keccak256);
    for (k, v) in S1_PAIRS {
        trie.set(k, value(v)).unwrap();
    }
    trie.get_snapshot().flush().unwrap();
    trie.clear_cache();
    for (k, v) in S1_PAIRS {
        assert_eq!(trie.get(k).unwrap(), Some(value(v)));
    }
    assert_eq!(root(&mut trie), S1_ROOT);
}

#[test]
fn builder_assembles_missing_nodes() {
    init();
    // build and persist on store A
    let store_a = Arc::new(MemStore::new());
    let mut source = Mutable::new(store_a.clone(), HashKind::Keccak256);
    for (k, v) in S1_PAIRS {
        source.set(k, value(v)).unwrap();
    }
    source.get_snapshot().flush().unwrap();

    // store B has nothing; pull the whole version over by digest
    let store_b = Arc::new(MemStore::new());
    let target: Immutable = Immutable::with_root(store_b.clone(), HashKind::Keccak256, S1_ROOT);
    let mut builder = MerkleBuilder::new(store_b.clone(), HashKind::Keccak256);
    target.resolve(&mut builder).unwrap();
    assert!(builder.unresolved_count() > 0);

    while builder.unresolved_count() > 0 {
        for digest in builder.unresolved() {
            let bytes = store_a.get(&digest).unwrap().expect("source has every node");
            builder.on_data(&bytes).unwrap();
        }
    }
    builder.flush().unwrap();

    let copied: Immutable = Immutable::with_root(store_b, HashKind::Keccak256, S1_ROOT);
    for (k, v) in S1_PAIRS {
        assert_eq!(copied.get(k).unwrap(), Some(value(v)));
    }

    // feeding bytes nobody asked for is an error
    assert!(builder.on_data(b"unsolicited").is_err());
}

#[test]
fn builder_resolves_local_data_immediately() {
    let store = Arc::new(MemStore::new());
    let mut trie = Mutable::new(store.clone(), HashKind::Keccak256);
    for (k, v) in S1_PAIRS {
        trie.set(k, value(v)).unwrap();
    }
    let snapshot = trie.get_snapshot();
    snapshot.flush().unwrap();

    // everything is already local, so nothing ends up outstanding
    let reopened: Immutable = Immutable::with_root(store.clone(), HashKind::Keccak256, S1_ROOT);
    let mut builder = MerkleBuilder::new(store, HashKind::Keccak256);
    reopened.resolve(&mut builder).unwrap();
    assert_eq!(builder.unresolved_count(), 0);
}

/// Minimal typed value: a counter persisted as minimal big-endian bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Counter(u64);

impl TrieValue for Counter {
    fn from_store(_store: &Arc<dyn BackingStore>, bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() || bytes.len() > 8 {
            return Err(Error::Corrupted("counter out of range"));
        }
        let mut raw = [0u8; 8];
        raw[8 - bytes.len()..].copy_from_slice(bytes);
        Ok(Self(u64::from_be_bytes(raw)))
    }

    fn to_bytes(&self) -> Bytes {
        let raw = self.0.to_be_bytes();
        let skip = raw.iter().take_while(|b| **b == 0).count().min(7);
        Bytes::copy_from_slice(&raw[skip..])
    }

    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }
}

#[test]
fn typed_values_share_the_digest_with_equal_bytes() {
    let mut typed: Mutable<Counter> =
        Mutable::new(Arc::new(MemStore::new()), HashKind::Keccak256);
    typed.set(b"alice", Counter(7)).unwrap();
    typed.set(b"bob", Counter(513)).unwrap();
    let typed_root = typed.get_snapshot().root_hash().unwrap().unwrap();

    let mut plain = build(&[(b"alice", &[7u8]), (b"bob", &[2u8, 1u8])]);
    assert_eq!(root(&mut plain), typed_root);

    // semantically equal values are a no-op set
    assert_eq!(typed.set(b"alice", Counter(7)).unwrap(), Some(Counter(7)));
    assert_eq!(typed.get_snapshot().root_hash().unwrap(), Some(typed_root));
}

#[test]
fn typed_values_flush_and_reopen() {
    let store = Arc::new(MemStore::new());
    let mut typed: Mutable<Counter> = Mutable::new(store.clone(), HashKind::Keccak256);
    typed.set(b"hits", Counter(40_000)).unwrap();
    let snapshot = typed.get_snapshot();
    let digest = snapshot.root_hash().unwrap().unwrap();
    snapshot.flush().unwrap();

    let reopened: Immutable<Counter> = Immutable::with_root(store, HashKind::Keccak256, digest);
    assert_eq!(reopened.get(b"hits").unwrap(), Some(Counter(40_000)));
}

#[test]
fn sha3_variant_hashes_differently_but_deterministically() {
    let mut a = Mutable::new(Arc::new(MemStore::new()), HashKind::Sha3);
    let mut b = Mutable::new(Arc::new(MemStore::new()), HashKind::Sha3);
    for (k, v) in S1_PAIRS {
        a.set(k, value(v)).unwrap();
    }
    for (k, v) in S1_PAIRS.iter().rev() {
        b.set(k, value(v)).unwrap();
    }
    let ra = a.get_snapshot().root_hash().unwrap().unwrap();
    let rb = b.get_snapshot().root_hash().unwrap().unwrap();
    assert_eq!(ra, rb);
    assert_ne!(ra, S1_ROOT);
}

#[test]
fn failed_write_leaves_the_trie_unchanged() {
    // a store that refuses reads makes realization fail mid-descent
    #[derive(Debug)]
    struct BrokenStore;
    impl BackingStore for BrokenStore {
        fn get(&self, _digest: &B256) -> Result<Option<Bytes>, Error> {
            Err(Error::Io("disk on fire".into()))
        }
        fn put(&self, _digest: &B256, _bytes: &[u8]) -> Result<(), Error> {
            Err(Error::Io("disk on fire".into()))
        }
    }

    let mut trie = Mutable::with_root(Arc::new(BrokenStore), HashKind::Keccak256, S1_ROOT);
    assert!(trie.set(b"dog", value(b"wolf")).is_err());
    assert!(trie.delete(b"doe").is_err());
    // the root reference is still the original digest
    assert_eq!(trie.get_snapshot().root_hash().unwrap(), Some(S1_ROOT));
}
