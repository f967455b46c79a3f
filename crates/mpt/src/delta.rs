//! Delta Merkle prefix trie: the change set of one commit

use bverify_primitives::Key;

use crate::codec::decode_root;
use crate::full::FullMpt;
use crate::node::{lookup, partition_keys, Interior, Lookup, Node};
use crate::{MptError, Result};

/// Nodes of a [`FullMpt`] changed since its last reset. Unchanged subtrees
/// are stubs.
///
/// A projection made with [`Self::updates_for_keys`] is what a subscriber
/// receives: applied to a [`crate::PartialMpt`] over the same keys it moves
/// that proof to the new commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaMpt {
    root: Interior,
}

impl DeltaMpt {
    /// Capture the changes in `full`. Must run before `full` is reset.
    pub fn from_full(full: &FullMpt) -> Self {
        let root = full.root();
        Self {
            root: Interior::with_cached_hash(
                root.left().map(changes_only),
                root.right().map(changes_only),
                root.hash(),
                true,
            ),
        }
    }

    pub(crate) const fn root(&self) -> &Interior {
        &self.root
    }

    /// Changes needed by a holder of a proof for `key`
    pub fn updates_for_key(&self, key: &Key) -> Self {
        self.updates_for_keys(std::slice::from_ref(key))
    }

    /// Changes needed by a holder of a proof for `keys`. Unchanged subtrees
    /// are left out entirely; changed subtrees off the key paths shrink to a
    /// stub or an empty leaf.
    pub fn updates_for_keys(&self, keys: &[Key]) -> Self {
        let keys: Vec<&Key> = keys.iter().collect();
        let (left_keys, right_keys) = partition_keys(&keys, 0);
        Self {
            root: Interior::from_parts(
                self.root.left().and_then(|node| project(node, &left_keys, 1)),
                self.root.right().and_then(|node| project(node, &right_keys, 1)),
                true,
            ),
        }
    }

    /// Value this delta carries for `key`. Fails with
    /// [`MptError::ProofUnauthenticated`] when the key's path was unchanged
    /// and so is not part of the delta.
    pub fn get(&self, key: &Key) -> Result<Option<&[u8]>> {
        match lookup(&self.root, key) {
            Lookup::Found(value) => Ok(Some(value)),
            Lookup::Absent => Ok(None),
            Lookup::Unknown => Err(MptError::ProofUnauthenticated),
        }
    }

    /// Whether the delta carries no change at all
    pub fn is_empty(&self) -> bool {
        [self.root.left(), self.root.right()]
            .into_iter()
            .all(|child| child.map_or(true, Node::is_stub))
    }

    /// Serialize the delta
    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.to_bytes()
    }

    /// Append the serialized delta to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        self.root.encode_into(out);
    }

    /// Serialized length
    pub fn encoded_len(&self) -> usize {
        self.root.encoded_len()
    }

    /// Parse a serialized delta. Absent children are allowed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self { root: decode_root(bytes)? })
    }
}

fn changes_only(node: &Node) -> Node {
    match node {
        unchanged if !unchanged.changed() => Node::stub(unchanged.hash()),
        Node::EmptyLeaf(_) => Node::empty(),
        Node::Interior(interior) => Node::Interior(Box::new(Interior::with_cached_hash(
            interior.left().map(changes_only),
            interior.right().map(changes_only),
            interior.hash(),
            true,
        ))),
        leaf => leaf.clone(),
    }
}

fn project(node: &Node, keys: &[&Key], depth: usize) -> Option<Node> {
    match node {
        Node::Stub(_) => None,
        Node::EmptyLeaf(_) => Some(node.clone()),
        _ if keys.is_empty() => Some(Node::stub(node.hash())),
        Node::Interior(interior) => {
            let (left_keys, right_keys) = partition_keys(keys, depth);
            Some(Node::Interior(Box::new(Interior::from_parts(
                interior.left().and_then(|child| project(child, &left_keys, depth + 1)),
                interior.right().and_then(|child| project(child, &right_keys, depth + 1)),
                true,
            ))))
        }
        leaf => Some(leaf.clone()),
    }
}
