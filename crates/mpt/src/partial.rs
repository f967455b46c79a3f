//! Partial Merkle prefix trie: a proof over a set of keys

use bverify_primitives::{Hash, Key};

use crate::codec::decode_root;
use crate::delta::DeltaMpt;
use crate::full::FullMpt;
use crate::node::{lookup, partition_keys, Interior, Lookup, Node};
use crate::{MptError, Result};

/// The paths of a [`FullMpt`] leading to a set of keys, with every other
/// subtree replaced by a stub. Its digest equals the full trie's, so it
/// proves the mapping of each covered key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialMpt {
    root: Interior,
}

impl PartialMpt {
    /// Proof covering no keys: the root over two stubs
    pub fn empty_proof(full: &FullMpt) -> Self {
        Self::from_full(full, &[])
    }

    /// Proof covering one key
    pub fn including_key(full: &FullMpt, key: &Key) -> Self {
        Self::from_full(full, std::slice::from_ref(key))
    }

    /// Proof covering `keys`. A key absent from `full` is covered by the
    /// empty leaf its path ends in.
    pub fn from_full(full: &FullMpt, keys: &[Key]) -> Self {
        let keys: Vec<&Key> = keys.iter().collect();
        let root = full.root();
        let (left_keys, right_keys) = partition_keys(&keys, 0);
        Self {
            root: Interior::with_cached_hash(
                root.left().map(|node| copy_paths(node, &left_keys, 1)),
                root.right().map(|node| copy_paths(node, &right_keys, 1)),
                root.hash(),
                false,
            ),
        }
    }

    /// Value for `key`: `Ok(None)` when the proof shows the key is absent,
    /// [`MptError::ProofUnauthenticated`] when the path ends in a stub.
    pub fn get(&self, key: &Key) -> Result<Option<&[u8]>> {
        match lookup(&self.root, key) {
            Lookup::Found(value) => Ok(Some(value)),
            Lookup::Absent => Ok(None),
            Lookup::Unknown => Err(MptError::ProofUnauthenticated),
        }
    }

    /// Root digest
    pub fn commitment(&self) -> Hash {
        self.root.hash()
    }

    /// Merge a delta so the proof follows the dictionary to its next
    /// commitment. Children the delta leaves out are kept as they are.
    ///
    /// Nothing is modified if the delta does not fit this proof.
    pub fn process_updates(&mut self, delta: &DeltaMpt) -> Result<()> {
        if !interior_accepts(&self.root, delta.root()) {
            return Err(MptError::IncompatibleUpdate);
        }
        merge_interior(&mut self.root, delta.root());
        Ok(())
    }

    /// [`Self::process_updates`] with a serialized delta
    pub fn process_updates_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let delta = DeltaMpt::from_bytes(bytes)?;
        self.process_updates(&delta)
    }

    /// Number of covered keys present in the proof
    pub fn size(&self) -> usize {
        self.root.count_non_empty_leaves()
    }

    /// Serialize the proof
    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.to_bytes()
    }

    /// Append the serialized proof to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        self.root.encode_into(out);
    }

    /// Serialized length
    pub fn encoded_len(&self) -> usize {
        self.root.encoded_len()
    }

    /// Parse a serialized proof
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let root = decode_root(bytes)?;
        if root.has_absent_child() {
            return Err(MptError::AbsentChild);
        }
        Ok(Self { root })
    }
}

fn copy_paths(node: &Node, keys: &[&Key], depth: usize) -> Node {
    if keys.is_empty() {
        return if node.is_empty() { Node::empty_unchanged() } else { Node::stub(node.hash()) };
    }
    match node {
        Node::Interior(interior) => {
            let (left_keys, right_keys) = partition_keys(keys, depth);
            Node::Interior(Box::new(Interior::with_cached_hash(
                interior.left().map(|child| copy_paths(child, &left_keys, depth + 1)),
                interior.right().map(|child| copy_paths(child, &right_keys, depth + 1)),
                interior.hash(),
                false,
            )))
        }
        leaf => leaf.clone(),
    }
}

/// Whether `update` can be merged over `current` without leaving a hole
fn interior_accepts(current: &Interior, update: &Interior) -> bool {
    [false, true].into_iter().all(|bit| match update.child(bit) {
        None => true,
        Some(Node::Interior(next)) => match current.child(bit) {
            Some(Node::Interior(existing)) => interior_accepts(existing, next),
            _ => !next.has_absent_child(),
        },
        Some(_) => true,
    })
}

fn merge_interior(current: &mut Interior, update: &Interior) {
    for bit in [false, true] {
        let Some(update_child) = update.child(bit) else {
            continue;
        };
        let merged = match (current.take_child(bit), update_child) {
            (Some(Node::Interior(mut existing)), Node::Interior(next)) => {
                merge_interior(&mut existing, next);
                Node::Interior(existing)
            }
            (_, replacement) => replacement.clone(),
        };
        current.set_child(bit, merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::*;
    use proptest::prelude::*;

    #[test]
    fn test_partial_matches_full() {
        let mpt = six_leaf_tree();
        for key in [K1, K2, K3, K4, K5, K6] {
            let partial = PartialMpt::including_key(&mpt, &key);
            assert_eq!(partial.commitment(), mpt.commitment());
            assert_eq!(partial.get(&key).unwrap(), mpt.get(&key));
            assert_eq!(partial.size(), 1);
        }
        let all = PartialMpt::from_full(&mpt, &[K1, K2, K3, K4, K5, K6]);
        assert_eq!(all.size(), 6);
        assert_eq!(all.commitment(), mpt.commitment());
    }

    #[test]
    fn test_partial_unknown_and_absent() {
        let mpt = six_leaf_tree();
        let partial = PartialMpt::including_key(&mpt, &K1);
        assert_eq!(partial.get(&K4), Err(MptError::ProofUnauthenticated));
        assert_eq!(partial.get(&K2), Err(MptError::ProofUnauthenticated));

        // K1 and K3 share a prefix ending in an interior whose other side is
        // empty, so a key on that side is provably absent.
        let mut absent = K1;
        absent[0] = 0b0000_0000;
        assert_eq!(partial.get(&absent), Ok(None));
    }

    #[test]
    fn test_empty_proof() {
        let mpt = six_leaf_tree();
        let partial = PartialMpt::empty_proof(&mpt);
        assert_eq!(partial.commitment(), mpt.commitment());
        assert_eq!(partial.get(&K1), Err(MptError::ProofUnauthenticated));
        assert_eq!(partial.size(), 0);

        let empty = FullMpt::new();
        let partial = PartialMpt::empty_proof(&empty);
        assert_eq!(partial.get(&K1), Ok(None));
    }

    #[test]
    fn test_partial_of_missing_key() {
        let mut mpt = FullMpt::new();
        mpt.insert(K4, V1);
        let partial = PartialMpt::including_key(&mpt, &K1);
        assert_eq!(partial.get(&K1), Ok(None));
        assert_eq!(partial.commitment(), mpt.commitment());
    }

    #[test]
    fn test_partial_serialize_roundtrip() {
        let mpt = six_leaf_tree();
        let partial = PartialMpt::from_full(&mpt, &[K1, K5]);
        let bytes = partial.to_bytes();
        assert_eq!(bytes.len(), partial.encoded_len());
        let restored = PartialMpt::from_bytes(&bytes).unwrap();
        assert_eq!(restored, partial);
        assert_eq!(restored.commitment(), mpt.commitment());
        assert_eq!(restored.get(&K5).unwrap(), Some(V2.as_slice()));
    }

    #[test]
    fn test_partial_rejects_bad_bytes() {
        assert!(PartialMpt::from_bytes(&[]).is_err());
        assert_eq!(PartialMpt::from_bytes(&Node::empty().to_bytes()), Err(MptError::RootNotInterior));
        let absent = Interior::from_parts(None, Some(Node::empty()), true).to_bytes();
        assert_eq!(PartialMpt::from_bytes(&absent), Err(MptError::AbsentChild));
    }

    #[test]
    fn test_process_updates_follows_full() {
        let mut mpt = six_leaf_tree();
        mpt.commitment();
        mpt.reset();
        let mut partial = PartialMpt::from_full(&mpt, &[K1, K3]);

        mpt.insert(K1, V1);
        mpt.delete(&K5);
        let delta = DeltaMpt::from_full(&mpt);
        partial.process_updates(&delta.updates_for_keys(&[K1, K3])).unwrap();

        assert_eq!(partial.commitment(), mpt.commitment());
        assert_eq!(partial.get(&K1).unwrap(), Some(V1.as_slice()));
        assert_eq!(partial.get(&K3).unwrap(), mpt.get(&K3));
    }

    #[test]
    fn test_process_updates_after_split() {
        let mut mpt = FullMpt::new();
        mpt.insert(K1, V1);
        mpt.insert(K4, V1);
        mpt.reset();
        let mut partial = PartialMpt::including_key(&mpt, &K1);

        // K3 collides with K1 and pushes it four levels down.
        mpt.insert(K3, V2);
        let bytes = DeltaMpt::from_full(&mpt).updates_for_key(&K1).to_bytes();
        partial.process_updates_from_bytes(&bytes).unwrap();
        assert_eq!(partial.commitment(), mpt.commitment());
        assert_eq!(partial.get(&K1).unwrap(), Some(V1.as_slice()));
    }

    #[test]
    fn test_process_updates_rejects_hole() {
        let mpt = six_leaf_tree();
        let mut partial = PartialMpt::empty_proof(&mpt);
        let before = partial.clone();
        let hole = Interior::from_parts(
            Some(Node::Interior(Box::new(Interior::from_parts(None, Some(Node::empty()), true)))),
            None,
            true,
        );
        let delta = DeltaMpt::from_bytes(&hole.to_bytes()).unwrap();
        assert_eq!(partial.process_updates(&delta), Err(MptError::IncompatibleUpdate));
        assert_eq!(partial, before);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_delta_round_trip(
            initial in proptest::collection::btree_map(any::<[u8; 32]>(), any::<[u8; 32]>(), 1..16),
            updates in proptest::collection::btree_map(any::<[u8; 32]>(), any::<[u8; 32]>(), 0..8),
            removed in proptest::collection::vec(any::<proptest::sample::Index>(), 0..4),
            covered in proptest::collection::vec(any::<proptest::sample::Index>(), 1..4),
        ) {
            let keys: Vec<Key> = initial.keys().copied().collect();
            let mut mpt = FullMpt::new();
            for (key, value) in &initial {
                mpt.insert(*key, *value);
            }
            mpt.commitment();
            mpt.reset();

            let mut watched: Vec<Key> = covered.iter().map(|i| keys[i.index(keys.len())]).collect();
            watched.extend(updates.keys().take(2).copied());
            let mut partial = PartialMpt::from_full(&mpt, &watched);
            prop_assert_eq!(partial.commitment(), mpt.commitment());

            for (key, value) in &updates {
                mpt.insert(*key, *value);
            }
            for index in &removed {
                mpt.delete(&keys[index.index(keys.len())]);
            }
            let delta = DeltaMpt::from_full(&mpt);
            partial.process_updates(&delta.updates_for_keys(&watched)).unwrap();

            prop_assert_eq!(partial.commitment(), mpt.commitment());
            for key in &watched {
                prop_assert_eq!(partial.get(key).unwrap(), mpt.get(key));
            }
        }
    }
}
