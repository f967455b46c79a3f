//! Merkle Prefix Trie (MPT) for b_verify
//!
//! A binary trie keyed by the bits of 32-byte keys. Every interior node's
//! digest is the hash of its two children's digests, so the root digest
//! commits to the whole dictionary. Three views share one node model:
//! - [`FullMpt`]: the complete mutable dictionary kept by the server
//! - [`PartialMpt`]: the paths to a set of keys, everything else pruned to stubs
//! - [`DeltaMpt`]: only the nodes changed since the last reset
//!
//! Hashes are computed lazily: mutation clears a node's cached digest and
//! the next [`FullMpt::commitment`] recomputes only the touched paths.

mod codec;
mod delta;
mod error;
mod full;
mod node;
mod partial;

pub use codec::{DecodeError, MAX_VALUE_LEN};
pub use delta::DeltaMpt;
pub use error::{MptError, Result};
pub use full::FullMpt;
pub use node::{DictionaryLeaf, EmptyLeaf, Interior, Node, SetLeaf, Stub};
pub use partial::PartialMpt;

pub use bverify_primitives::{Hash, Key, EMPTY_HASH};

/// Number of key bits, and so the deepest level a leaf can sit at
pub const KEY_BITS: usize = 256;
