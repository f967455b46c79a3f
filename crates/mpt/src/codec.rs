//! Byte encoding of trie nodes.
//!
//! Depth-first preorder stream, one tag byte per node:
//!
//! | Tag | Node | Body |
//! |---|---|---|
//! | `0x00` | Stub | VarBytes(hash) |
//! | `0x01` | DictionaryLeaf | VarBytes(key) VarBytes(value) |
//! | `0x02` | EmptyLeaf | none |
//! | `0x03` | Interior | per child: u32 BE length, child bytes (length 0 = absent) |
//! | `0x04` | SetLeaf | VarBytes(value) |

use bverify_primitives::varint::{self, read_var_bytes, take_array, write_var_bytes};
use bverify_primitives::{PrimitiveError, HASH_LEN};
use thiserror::Error;

use crate::node::{DictionaryLeaf, Interior, Node, SetLeaf};
use crate::KEY_BITS;

const TAG_STUB: u8 = 0x00;
const TAG_DICTIONARY_LEAF: u8 = 0x01;
const TAG_EMPTY_LEAF: u8 = 0x02;
const TAG_INTERIOR: u8 = 0x03;
const TAG_SET_LEAF: u8 = 0x04;

/// Largest dictionary value accepted when decoding
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Errors raised while decoding node bytes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Nothing to decode
    #[error("empty input")]
    Empty,

    /// Tag byte does not name a node variant
    #[error("unknown node tag {0:#04x}")]
    UnknownTag(u8),

    /// Truncated input or an over-long field
    #[error(transparent)]
    Field(#[from] PrimitiveError),

    /// Key, hash or set value is not 32 bytes
    #[error("expected {HASH_LEN} bytes, got {0}")]
    BadLength(usize),

    /// Interiors nest deeper than a key has bits
    #[error("interior nodes nested deeper than {KEY_BITS} levels")]
    TooDeep,

    /// Bytes left over after the root node
    #[error("{0} trailing bytes after root node")]
    TrailingBytes(usize),
}

impl Node {
    /// Serialize this subtree
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Append this subtree's encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Stub(stub) => {
                out.push(TAG_STUB);
                write_var_bytes(out, &stub.hash());
            }
            Self::DictionaryLeaf(leaf) => {
                out.push(TAG_DICTIONARY_LEAF);
                write_var_bytes(out, leaf.key());
                write_var_bytes(out, leaf.value());
            }
            Self::EmptyLeaf(_) => out.push(TAG_EMPTY_LEAF),
            Self::Interior(interior) => interior.encode_into(out),
            Self::SetLeaf(leaf) => {
                out.push(TAG_SET_LEAF);
                write_var_bytes(out, leaf.value());
            }
        }
    }

    /// Length of [`Self::to_bytes`] without serializing
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Stub(_) | Self::SetLeaf(_) => 1 + varint::var_bytes_len(&[0u8; HASH_LEN]),
            Self::DictionaryLeaf(leaf) => {
                1 + varint::var_bytes_len(leaf.key()) + varint::var_bytes_len(leaf.value())
            }
            Self::EmptyLeaf(_) => 1,
            Self::Interior(interior) => interior.encoded_len(),
        }
    }

    /// Decode a single node, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut input = bytes;
        let node = decode(&mut input, 0)?;
        if !input.is_empty() {
            return Err(DecodeError::TrailingBytes(input.len()));
        }
        Ok(node)
    }
}

impl Interior {
    /// Append this subtree's encoding to `out`.
    ///
    /// Child lengths are patched in after each child is written, so the
    /// subtree is walked once.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(TAG_INTERIOR);
        for child in [self.left(), self.right()] {
            let len_at = out.len();
            out.extend_from_slice(&[0u8; 4]);
            if let Some(child) = child {
                let start = out.len();
                child.encode_into(out);
                let len = (out.len() - start) as u32;
                out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
            }
        }
    }

    /// Serialize this subtree
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Length of [`Self::to_bytes`] without serializing
    pub fn encoded_len(&self) -> usize {
        1 + [self.left(), self.right()]
            .into_iter()
            .map(|child| 4 + child.map_or(0, Node::encoded_len))
            .sum::<usize>()
    }
}

/// Decode an interior root, as every trie view is rooted in one
pub(crate) fn decode_root(bytes: &[u8]) -> crate::Result<Interior> {
    match Node::from_bytes(bytes)? {
        Node::Interior(interior) => Ok(*interior),
        _ => Err(crate::MptError::RootNotInterior),
    }
}

fn decode(input: &mut &[u8], depth: usize) -> Result<Node, DecodeError> {
    let (&tag, rest) = input.split_first().ok_or(DecodeError::Empty)?;
    *input = rest;
    match tag {
        TAG_STUB => Ok(Node::stub(read_hash(input, "stub hash")?)),
        TAG_DICTIONARY_LEAF => {
            let key = read_hash(input, "leaf key")?;
            let value = read_var_bytes(input, MAX_VALUE_LEN, "leaf value")?;
            Ok(Node::DictionaryLeaf(DictionaryLeaf::unchanged(key, value.to_vec())))
        }
        TAG_EMPTY_LEAF => Ok(Node::empty_unchanged()),
        TAG_INTERIOR => {
            if depth >= KEY_BITS {
                return Err(DecodeError::TooDeep);
            }
            let left = decode_child(input, depth)?;
            let right = decode_child(input, depth)?;
            Ok(Node::Interior(Box::new(Interior::from_parts(left, right, false))))
        }
        TAG_SET_LEAF => Ok(Node::SetLeaf(SetLeaf::unchanged(read_hash(input, "set value")?))),
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn decode_child(input: &mut &[u8], depth: usize) -> Result<Option<Node>, DecodeError> {
    let len = u32::from_be_bytes(take_array(input)?) as usize;
    if len == 0 {
        return Ok(None);
    }
    let mut body = varint::take(input, len)?;
    decode(&mut body, depth + 1).map(Some)
}

fn read_hash(input: &mut &[u8], field: &'static str) -> Result<[u8; HASH_LEN], DecodeError> {
    let bytes = read_var_bytes(input, HASH_LEN, field)?;
    bytes.try_into().map_err(|_| DecodeError::BadLength(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::*;
    use crate::MptError;

    fn sample_tree() -> Node {
        Node::interior(
            Node::interior(Node::dictionary_leaf(K1, V1), Node::empty()),
            Node::interior(Node::stub(V2), Node::set_leaf(V1)),
        )
    }

    #[test]
    fn test_roundtrip_every_variant() {
        let nodes = [
            Node::stub(V1),
            Node::dictionary_leaf(K1, V2),
            Node::dictionary_leaf(K2, Vec::new()),
            Node::empty(),
            Node::set_leaf(V2),
            sample_tree(),
        ];
        for node in nodes {
            let bytes = node.to_bytes();
            assert_eq!(bytes.len(), node.encoded_len());
            let decoded = Node::from_bytes(&bytes).unwrap();
            assert_eq!(decoded, node);
            assert_eq!(decoded.hash(), node.hash());
        }
    }

    #[test]
    fn test_dictionary_leaf_layout() {
        let bytes = Node::dictionary_leaf(K1, [0xAA, 0xBB]).to_bytes();
        assert_eq!(bytes[0], TAG_DICTIONARY_LEAF);
        assert_eq!(bytes[1], 32);
        assert_eq!(&bytes[2..34], &K1);
        assert_eq!(&bytes[34..], &[2, 0xAA, 0xBB]);
    }

    #[test]
    fn test_interior_layout() {
        let bytes = Node::interior(Node::empty(), Node::empty()).to_bytes();
        assert_eq!(bytes, vec![TAG_INTERIOR, 0, 0, 0, 1, TAG_EMPTY_LEAF, 0, 0, 0, 1, TAG_EMPTY_LEAF]);
    }

    #[test]
    fn test_absent_child_roundtrip() {
        let interior = Interior::from_parts(None, Some(Node::stub(V1)), true);
        let bytes = interior.to_bytes();
        assert_eq!(&bytes[..5], &[TAG_INTERIOR, 0, 0, 0, 0]);
        let decoded = decode_root(&bytes).unwrap();
        assert!(decoded.left().is_none());
        assert_eq!(decoded.right(), Some(&Node::stub(V1)));
    }

    #[test]
    fn test_rejects_empty_and_unknown_tag() {
        assert_eq!(Node::from_bytes(&[]), Err(DecodeError::Empty));
        assert_eq!(Node::from_bytes(&[0x05]), Err(DecodeError::UnknownTag(0x05)));
        assert_eq!(Node::from_bytes(&[0xFF, 0x00]), Err(DecodeError::UnknownTag(0xFF)));
    }

    #[test]
    fn test_rejects_trailing_bytes_at_root() {
        let mut bytes = Node::empty().to_bytes();
        bytes.push(0);
        assert_eq!(Node::from_bytes(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_rejects_truncated_input() {
        let bytes = sample_tree().to_bytes();
        for cut in 1..bytes.len() {
            assert!(Node::from_bytes(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_rejects_short_key() {
        let bytes = [TAG_DICTIONARY_LEAF, 2, 1, 2, 0];
        assert_eq!(Node::from_bytes(&bytes), Err(DecodeError::BadLength(2)));
    }

    #[test]
    fn test_rejects_too_deep() {
        let mut node = Node::empty();
        for _ in 0..=KEY_BITS {
            node = Node::interior(node, Node::empty());
        }
        assert_eq!(Node::from_bytes(&node.to_bytes()), Err(DecodeError::TooDeep));
    }

    #[test]
    fn test_root_must_be_interior() {
        let bytes = Node::empty().to_bytes();
        assert_eq!(decode_root(&bytes), Err(MptError::RootNotInterior));
        assert!(matches!(decode_root(&[]), Err(MptError::Decode(DecodeError::Empty))));
    }
}
