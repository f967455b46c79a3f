//! Node variants of the prefix trie

use std::sync::OnceLock;

use bverify_primitives::{key_bit, Hash, Key, Sha256Hasher, EMPTY_HASH};

/// A trie node.
///
/// Interior nodes own their children. Stubs stand in for pruned subtrees
/// and only occur in partial and delta views.
#[derive(Clone, Debug)]
pub enum Node {
    /// Cached digest of an elided subtree
    Stub(Stub),
    /// A (key, value) mapping
    DictionaryLeaf(DictionaryLeaf),
    /// No key at this position
    EmptyLeaf(EmptyLeaf),
    /// Branch on one key bit
    Interior(Box<Interior>),
    /// A set member; its key is its value
    SetLeaf(SetLeaf),
}

/// Stand-in for a subtree that is not part of a view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stub {
    hash: Hash,
}

impl Stub {
    /// Stub carrying `hash`
    pub const fn new(hash: Hash) -> Self {
        Self { hash }
    }

    /// The elided subtree's digest
    pub const fn hash(&self) -> Hash {
        self.hash
    }
}

/// Empty position; hashes to 32 zero bytes
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyLeaf {
    changed: bool,
}

/// Leaf holding one dictionary mapping
#[derive(Clone, Debug)]
pub struct DictionaryLeaf {
    key: Key,
    value: Vec<u8>,
    changed: bool,
    hash: OnceLock<Hash>,
}

impl DictionaryLeaf {
    /// New leaf, marked changed
    pub fn new(key: Key, value: Vec<u8>) -> Self {
        Self { key, value, changed: true, hash: OnceLock::new() }
    }

    pub(crate) fn unchanged(key: Key, value: Vec<u8>) -> Self {
        Self { key, value, changed: false, hash: OnceLock::new() }
    }

    /// Leaf key
    pub const fn key(&self) -> &Key {
        &self.key
    }

    /// Leaf value
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// `SHA256(key || value)`, cached
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| Sha256Hasher::hash_leaf(&self.key, &self.value))
    }

    /// Replace the value. Writing the value already stored is a no-op.
    pub(crate) fn set_value(&mut self, value: Vec<u8>) {
        if self.value != value {
            self.value = value;
            self.changed = true;
            self.hash = OnceLock::new();
        }
    }
}

/// Leaf of an authenticated set: the value is its own key and digest
#[derive(Clone, Copy, Debug)]
pub struct SetLeaf {
    value: Hash,
    changed: bool,
}

impl SetLeaf {
    /// New set member, marked changed
    pub const fn new(value: Hash) -> Self {
        Self { value, changed: true }
    }

    pub(crate) const fn unchanged(value: Hash) -> Self {
        Self { value, changed: false }
    }

    /// Member value
    pub const fn value(&self) -> &Hash {
        &self.value
    }
}

/// Interior node branching on one key bit (`false` = left).
///
/// A child is `None` only inside a delta projection, where it means
/// "unchanged, keep what you have".
#[derive(Clone, Debug)]
pub struct Interior {
    left: Option<Node>,
    right: Option<Node>,
    changed: bool,
    hash: OnceLock<Hash>,
}

impl Interior {
    /// New interior over two children, marked changed
    pub fn new(left: Node, right: Node) -> Self {
        Self::from_parts(Some(left), Some(right), true)
    }

    pub(crate) fn from_parts(left: Option<Node>, right: Option<Node>, changed: bool) -> Self {
        Self { left, right, changed, hash: OnceLock::new() }
    }

    /// Interior whose digest is already known. Used when copying paths out
    /// of a full trie so unchanged subtrees are never rehashed.
    pub(crate) fn with_cached_hash(
        left: Option<Node>,
        right: Option<Node>,
        hash: Hash,
        changed: bool,
    ) -> Self {
        Self { left, right, changed, hash: OnceLock::from(hash) }
    }

    /// Left child
    pub const fn left(&self) -> Option<&Node> {
        self.left.as_ref()
    }

    /// Right child
    pub const fn right(&self) -> Option<&Node> {
        self.right.as_ref()
    }

    /// Child selected by a key bit
    pub const fn child(&self, bit: bool) -> Option<&Node> {
        if bit {
            self.right.as_ref()
        } else {
            self.left.as_ref()
        }
    }

    /// Detach a child, leaving the slot empty until [`Self::set_child`]
    pub(crate) fn take_child(&mut self, bit: bool) -> Option<Node> {
        if bit {
            self.right.take()
        } else {
            self.left.take()
        }
    }

    /// Replace a child; marks this node changed and drops its cached digest
    pub(crate) fn set_child(&mut self, bit: bool, node: Node) {
        if bit {
            self.right = Some(node);
        } else {
            self.left = Some(node);
        }
        self.changed = true;
        self.hash = OnceLock::new();
    }

    /// Whether this node was touched since the last reset
    pub const fn changed(&self) -> bool {
        self.changed
    }

    /// Digest over the present children, cached until the next mutation
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| match (&self.left, &self.right) {
            (Some(left), Some(right)) => Sha256Hasher::hash_pair(&left.hash(), &right.hash()),
            (left, right) => {
                let hashes: Vec<Hash> = left.iter().chain(right.iter()).map(Node::hash).collect();
                Sha256Hasher::hash_all(hashes.iter().map(|h| h.as_slice()))
            }
        })
    }

    fn children(&self) -> impl Iterator<Item = &Node> {
        self.left.iter().chain(self.right.iter())
    }

    fn children_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.left.iter_mut().chain(self.right.iter_mut())
    }

    /// Whether any interior in this subtree leaves a child out
    pub fn has_absent_child(&self) -> bool {
        self.left.is_none()
            || self.right.is_none()
            || self.children().any(|c| matches!(c, Node::Interior(i) if i.has_absent_child()))
    }

    pub(crate) fn mark_changed_all(&mut self) {
        self.changed = true;
        self.children_mut().for_each(Node::mark_changed_all);
    }

    /// Clear `changed` bits. An unchanged node has no changed descendants,
    /// so only touched paths are walked.
    pub(crate) fn mark_unchanged_all(&mut self) {
        if !self.changed {
            return;
        }
        self.changed = false;
        self.children_mut().for_each(Node::mark_unchanged_all);
    }

    /// Longest path from this node down to a leaf
    pub fn height(&self) -> usize {
        1 + self.children().map(Node::height).max().unwrap_or(0)
    }

    /// Nodes in this subtree, this one included
    pub fn count_nodes(&self) -> usize {
        1 + self.children().map(Node::count_nodes).sum::<usize>()
    }

    /// Interior nodes in this subtree, this one included
    pub fn count_interior(&self) -> usize {
        1 + self.children().map(Node::count_interior).sum::<usize>()
    }

    /// Empty leaves in this subtree
    pub fn count_empty_leaves(&self) -> usize {
        self.children().map(Node::count_empty_leaves).sum()
    }

    /// Dictionary and set leaves in this subtree
    pub fn count_non_empty_leaves(&self) -> usize {
        self.children().map(Node::count_non_empty_leaves).sum()
    }

    /// Hashes a digest request would compute right now
    pub fn pending_hashes(&self) -> usize {
        if self.hash.get().is_some() {
            return 0;
        }
        1 + self.children().map(Node::pending_hashes).sum::<usize>()
    }
}

impl PartialEq for Interior {
    fn eq(&self, other: &Self) -> bool {
        self.left == other.left && self.right == other.right
    }
}

impl Eq for Interior {}

impl Node {
    /// A new empty leaf, marked changed
    pub const fn empty() -> Self {
        Self::EmptyLeaf(EmptyLeaf { changed: true })
    }

    pub(crate) const fn empty_unchanged() -> Self {
        Self::EmptyLeaf(EmptyLeaf { changed: false })
    }

    /// Stub carrying `hash`
    pub const fn stub(hash: Hash) -> Self {
        Self::Stub(Stub::new(hash))
    }

    /// A new dictionary leaf, marked changed
    pub fn dictionary_leaf(key: Key, value: impl Into<Vec<u8>>) -> Self {
        Self::DictionaryLeaf(DictionaryLeaf::new(key, value.into()))
    }

    /// A new set leaf, marked changed
    pub const fn set_leaf(value: Hash) -> Self {
        Self::SetLeaf(SetLeaf::new(value))
    }

    /// A new interior node, marked changed
    pub fn interior(left: Self, right: Self) -> Self {
        Self::Interior(Box::new(Interior::new(left, right)))
    }

    /// Node digest. Leaves and interiors cache theirs.
    pub fn hash(&self) -> Hash {
        match self {
            Self::Stub(stub) => stub.hash,
            Self::EmptyLeaf(_) => EMPTY_HASH,
            Self::DictionaryLeaf(leaf) => leaf.hash(),
            Self::SetLeaf(leaf) => leaf.value,
            Self::Interior(interior) => interior.hash(),
        }
    }

    /// Empty, dictionary and set leaves
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::EmptyLeaf(_) | Self::DictionaryLeaf(_) | Self::SetLeaf(_))
    }

    /// Whether this is an empty leaf
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::EmptyLeaf(_))
    }

    /// Whether this is a stub
    pub const fn is_stub(&self) -> bool {
        matches!(self, Self::Stub(_))
    }

    /// Key of a non-empty leaf
    pub const fn key(&self) -> Option<&Key> {
        match self {
            Self::DictionaryLeaf(leaf) => Some(&leaf.key),
            Self::SetLeaf(leaf) => Some(&leaf.value),
            _ => None,
        }
    }

    /// Value of a non-empty leaf
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::DictionaryLeaf(leaf) => Some(leaf.value.as_slice()),
            Self::SetLeaf(leaf) => Some(leaf.value.as_slice()),
            _ => None,
        }
    }

    /// Whether the node was touched since the last reset. Stubs never are.
    pub const fn changed(&self) -> bool {
        match self {
            Self::Stub(_) => false,
            Self::EmptyLeaf(leaf) => leaf.changed,
            Self::DictionaryLeaf(leaf) => leaf.changed,
            Self::SetLeaf(leaf) => leaf.changed,
            Self::Interior(interior) => interior.changed,
        }
    }

    /// Interior payload, if any
    pub fn as_interior(&self) -> Option<&Interior> {
        match self {
            Self::Interior(interior) => Some(interior),
            _ => None,
        }
    }

    pub(crate) fn mark_changed_all(&mut self) {
        match self {
            Self::Stub(_) => {}
            Self::EmptyLeaf(leaf) => leaf.changed = true,
            Self::DictionaryLeaf(leaf) => leaf.changed = true,
            Self::SetLeaf(leaf) => leaf.changed = true,
            Self::Interior(interior) => interior.mark_changed_all(),
        }
    }

    pub(crate) fn mark_unchanged_all(&mut self) {
        match self {
            Self::Stub(_) => {}
            Self::EmptyLeaf(leaf) => leaf.changed = false,
            Self::DictionaryLeaf(leaf) => leaf.changed = false,
            Self::SetLeaf(leaf) => leaf.changed = false,
            Self::Interior(interior) => interior.mark_unchanged_all(),
        }
    }

    /// Longest path down to a leaf; zero for leaves and stubs
    pub fn height(&self) -> usize {
        self.as_interior().map_or(0, Interior::height)
    }

    /// Nodes in this subtree
    pub fn count_nodes(&self) -> usize {
        self.as_interior().map_or(1, Interior::count_nodes)
    }

    /// Interior nodes in this subtree
    pub fn count_interior(&self) -> usize {
        self.as_interior().map_or(0, Interior::count_interior)
    }

    /// Empty leaves in this subtree
    pub fn count_empty_leaves(&self) -> usize {
        match self {
            Self::EmptyLeaf(_) => 1,
            Self::Interior(interior) => interior.count_empty_leaves(),
            _ => 0,
        }
    }

    /// Dictionary and set leaves in this subtree
    pub fn count_non_empty_leaves(&self) -> usize {
        match self {
            Self::DictionaryLeaf(_) | Self::SetLeaf(_) => 1,
            Self::Interior(interior) => interior.count_non_empty_leaves(),
            _ => 0,
        }
    }

    /// Hashes a digest request would compute right now
    pub fn pending_hashes(&self) -> usize {
        match self {
            Self::DictionaryLeaf(leaf) => usize::from(leaf.hash.get().is_none()),
            Self::Interior(interior) => interior.pending_hashes(),
            _ => 0,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Stub(a), Self::Stub(b)) => a.hash == b.hash,
            (Self::EmptyLeaf(_), Self::EmptyLeaf(_)) => true,
            (Self::DictionaryLeaf(a), Self::DictionaryLeaf(b)) => a.key == b.key && a.value == b.value,
            (Self::SetLeaf(a), Self::SetLeaf(b)) => a.value == b.value,
            (Self::Interior(a), Self::Interior(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Node {}

/// Outcome of walking a view towards a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup<'a> {
    Found(&'a [u8]),
    Absent,
    /// The walk hit a stub or a missing child
    Unknown,
}

/// Walk from `root` following the bits of `key`
pub(crate) fn lookup<'a>(root: &'a Interior, key: &Key) -> Lookup<'a> {
    let mut current = root;
    let mut depth = 0;
    loop {
        let Some(child) = current.child(key_bit(key, depth)) else {
            return Lookup::Unknown;
        };
        match child {
            Node::Interior(interior) => {
                current = interior;
                depth += 1;
            }
            Node::Stub(_) => return Lookup::Unknown,
            leaf => {
                return match leaf.value() {
                    Some(value) if leaf.key() == Some(key) => Lookup::Found(value),
                    _ => Lookup::Absent,
                };
            }
        }
    }
}

/// Split `keys` by their bit at `depth`: (left, right)
pub(crate) fn partition_keys<'a>(keys: &[&'a Key], depth: usize) -> (Vec<&'a Key>, Vec<&'a Key>) {
    keys.iter().copied().partition(|key| !key_bit(key.as_slice(), depth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::*;
    use hex_literal::hex;

    #[test]
    fn test_interior_hash_vector() {
        let k2 = hex!("2134567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef");
        let interior = Node::interior(Node::dictionary_leaf(K1, V1), Node::dictionary_leaf(k2, V2));
        assert_eq!(
            interior.hash(),
            hex!("b0a16687f6701fea2b317cf84642a7de3093b34312e78b24da6cee66aee1fb23")
        );
    }

    #[test]
    fn test_leaf_hashes() {
        assert_eq!(Node::empty().hash(), EMPTY_HASH);
        assert_eq!(Node::set_leaf(V1).hash(), V1);
        assert_eq!(Node::stub(V2).hash(), V2);
        assert_eq!(Node::dictionary_leaf(K1, V1).hash(), Sha256Hasher::hash_leaf(&K1, &V1));
    }

    #[test]
    fn test_node_height() {
        let in1 = Node::interior(Node::empty(), Node::empty());
        let in2 = Node::interior(in1.clone(), Node::empty());
        let in3 = Node::interior(in2.clone(), Node::empty());
        assert_eq!(Node::empty().height(), 0);
        assert_eq!(in1.height(), 1);
        assert_eq!(in2.height(), 2);
        assert_eq!(in3.height(), 3);
    }

    #[test]
    fn test_set_child_invalidates_hash() {
        let mut interior = Interior::new(Node::empty(), Node::empty());
        let before = interior.hash();
        assert_eq!(interior.pending_hashes(), 0);
        interior.set_child(true, Node::dictionary_leaf(K1, V1));
        assert_eq!(interior.pending_hashes(), 2);
        assert_ne!(interior.hash(), before);
        assert_eq!(interior.pending_hashes(), 0);
    }

    #[test]
    fn test_set_value_same_value_keeps_cache() {
        let mut leaf = DictionaryLeaf::unchanged(K1, V1.to_vec());
        let hash = leaf.hash();
        leaf.set_value(V1.to_vec());
        assert!(!leaf.changed);
        assert!(leaf.hash.get().is_some());
        leaf.set_value(V2.to_vec());
        assert!(leaf.changed);
        assert_ne!(leaf.hash(), hash);
    }

    #[test]
    fn test_structural_equality() {
        let a = Node::interior(Node::dictionary_leaf(K1, V1), Node::empty());
        let b = Node::interior(Node::dictionary_leaf(K1, V1), Node::empty_unchanged());
        assert_eq!(a, b);
        assert_ne!(a, Node::interior(Node::dictionary_leaf(K1, V2), Node::empty()));
        assert_ne!(Node::stub(V1), Node::set_leaf(V1));
        assert_eq!(Node::stub(V1), Node::stub(V1));
    }

    #[test]
    fn test_mark_changed_and_unchanged() {
        let mut node = Node::interior(Node::dictionary_leaf(K1, V1), Node::empty());
        node.mark_unchanged_all();
        assert!(!node.changed());
        let interior = node.as_interior().unwrap();
        assert!(!interior.left().unwrap().changed());
        node.mark_changed_all();
        assert!(node.as_interior().unwrap().right().unwrap().changed());
    }

    #[test]
    fn test_absent_child_detection() {
        let complete = Interior::new(Node::empty(), Node::interior(Node::empty(), Node::empty()));
        assert!(!complete.has_absent_child());
        let nested = Interior::new(
            Node::empty(),
            Node::Interior(Box::new(Interior::from_parts(None, Some(Node::empty()), true))),
        );
        assert!(nested.has_absent_child());
    }

    #[test]
    fn test_partition_keys() {
        let keys = [&K1, &K4, &K5];
        let (left, right) = partition_keys(&keys, 0);
        assert_eq!(left, vec![&K1]);
        assert_eq!(right, vec![&K4, &K5]);
    }
}
