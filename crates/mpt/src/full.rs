//! Full Merkle prefix trie: the complete, mutable dictionary

use bverify_primitives::{key_bit, Hash, Key};

use crate::codec::decode_root;
use crate::node::{lookup, Interior, Lookup, Node};
use crate::{MptError, Result};

/// Complete authenticated dictionary.
///
/// Contains no stubs. Every mutation marks the nodes it touches as changed;
/// digests of touched nodes are recomputed on the next [`Self::commitment`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullMpt {
    root: Interior,
}

impl Default for FullMpt {
    fn default() -> Self {
        Self::new()
    }
}

impl FullMpt {
    /// Empty dictionary: an interior root over two empty leaves
    pub fn new() -> Self {
        Self { root: Interior::new(Node::empty(), Node::empty()) }
    }

    pub(crate) const fn root(&self) -> &Interior {
        &self.root
    }

    /// Map `key` to `value`, replacing any previous value.
    ///
    /// Re-inserting the current value leaves the leaf alone but still marks
    /// the interior path as changed.
    pub fn insert(&mut self, key: Key, value: impl Into<Vec<u8>>) {
        let value = value.into();
        let bit = key_bit(&key, 0);
        let child = self.root.take_child(bit).unwrap_or_else(Node::empty);
        self.root.set_child(bit, insert_at(child, key, value, 1));
    }

    /// Value mapped to `key`
    pub fn get(&self, key: &Key) -> Option<&[u8]> {
        match lookup(&self.root, key) {
            Lookup::Found(value) => Some(value),
            Lookup::Absent | Lookup::Unknown => None,
        }
    }

    /// Remove `key` if present. The root is never collapsed.
    pub fn delete(&mut self, key: &Key) {
        let bit = key_bit(key, 0);
        let child = self.root.take_child(bit).unwrap_or_else(Node::empty);
        self.root.set_child(bit, delete_at(child, key, 1));
    }

    /// Root digest
    pub fn commitment(&self) -> Hash {
        self.root.hash()
    }

    /// Clear every `changed` bit, normally right after a commit
    pub fn reset(&mut self) {
        self.root.mark_unchanged_all();
    }

    /// Whether anything was touched since the last reset
    pub const fn has_changes(&self) -> bool {
        self.root.changed()
    }

    /// Number of keys
    pub fn size(&self) -> usize {
        self.root.count_non_empty_leaves()
    }

    /// Longest root-to-leaf path; 1 for an empty dictionary
    pub fn max_height(&self) -> usize {
        self.root.height()
    }

    /// Total number of nodes
    pub fn count_nodes(&self) -> usize {
        self.root.count_nodes()
    }

    /// Number of interior nodes
    pub fn count_interior_nodes(&self) -> usize {
        self.root.count_interior()
    }

    /// Number of empty leaves
    pub fn count_empty_leaves(&self) -> usize {
        self.root.count_empty_leaves()
    }

    /// Number of non-empty leaves
    pub fn count_non_empty_leaves(&self) -> usize {
        self.root.count_non_empty_leaves()
    }

    /// Hashes the next [`Self::commitment`] call will compute
    pub fn pending_hashes(&self) -> usize {
        self.root.pending_hashes()
    }

    /// Serialize the dictionary
    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.to_bytes()
    }

    /// Parse a serialized dictionary. The result starts with no changes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let root = decode_root(bytes)?;
        check_full(&root)?;
        Ok(Self { root })
    }
}

fn insert_at(node: Node, key: Key, value: Vec<u8>, depth: usize) -> Node {
    match node {
        Node::Interior(mut interior) => {
            let bit = key_bit(&key, depth);
            let child = interior.take_child(bit).unwrap_or_else(Node::empty);
            interior.set_child(bit, insert_at(child, key, value, depth + 1));
            Node::Interior(interior)
        }
        Node::DictionaryLeaf(mut leaf) if *leaf.key() == key => {
            leaf.set_value(value);
            Node::DictionaryLeaf(leaf)
        }
        Node::EmptyLeaf(_) => Node::dictionary_leaf(key, value),
        mut existing => {
            // Stubs never occur in a full trie; a keyless node is overwritten.
            let Some(existing_key) = existing.key().copied() else {
                return Node::dictionary_leaf(key, value);
            };
            // The existing leaf moves down, so its position changes too.
            existing.mark_changed_all();
            split(existing, &existing_key, Node::dictionary_leaf(key, value), &key, depth)
        }
    }
}

/// Push two leaves down until their keys disagree on a bit, leaving empty
/// siblings along the shared prefix.
fn split(existing: Node, existing_key: &Key, added: Node, added_key: &Key, depth: usize) -> Node {
    let existing_bit = key_bit(existing_key, depth);
    if existing_bit == key_bit(added_key, depth) {
        let below = split(existing, existing_key, added, added_key, depth + 1);
        return if existing_bit {
            Node::interior(Node::empty(), below)
        } else {
            Node::interior(below, Node::empty())
        };
    }
    if existing_bit {
        Node::interior(added, existing)
    } else {
        Node::interior(existing, added)
    }
}

/// Delete `key` below `node`. While unwinding, a non-root interior left with
/// one leaf and one empty sibling is replaced by that leaf, so a lone leaf
/// floats up to where a fresh insert would have put it.
fn delete_at(node: Node, key: &Key, depth: usize) -> Node {
    let mut interior = match node {
        Node::Interior(interior) => interior,
        leaf => {
            return if leaf.key() == Some(key) { Node::empty() } else { leaf };
        }
    };
    let bit = key_bit(key, depth);
    let child = interior.take_child(bit).unwrap_or_else(Node::empty);
    let new_child = delete_at(child, key, depth + 1);

    let sibling_empty = interior.child(!bit).map_or(true, Node::is_empty);
    if sibling_empty && new_child.is_leaf() {
        return new_child;
    }
    if new_child.is_empty() && interior.child(!bit).is_some_and(Node::is_leaf) {
        if let Some(mut sibling) = interior.take_child(!bit) {
            sibling.mark_changed_all();
            return sibling;
        }
    }
    interior.set_child(bit, new_child);
    Node::Interior(interior)
}

fn check_full(interior: &Interior) -> Result<()> {
    for child in [interior.left(), interior.right()] {
        match child {
            None => return Err(MptError::AbsentChild),
            Some(Node::Stub(_)) => return Err(MptError::UnexpectedStub),
            Some(Node::Interior(inner)) => check_full(inner)?,
            Some(_) => {}
        }
    }
    Ok(())
}
