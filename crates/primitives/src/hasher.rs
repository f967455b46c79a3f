//! SHA-256 hasher for the prefix trie and log witnesses

use sha2::{Digest, Sha256};

use crate::Hash;

/// Hash a single byte string
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// SHA-256 hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Sha256Hasher {
    /// Hash a single value
    pub fn hash(data: &[u8]) -> Hash {
        sha256(data)
    }

    /// Hash two 32-byte values together (interior node digest)
    pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().into()
    }

    /// Hash a key-value pair for a dictionary leaf.
    ///
    /// No domain prefix: the leaf digest is `SHA256(key || value)`.
    pub fn hash_leaf(key: &[u8], value: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(value);
        hasher.finalize().into()
    }

    /// Hash over several byte strings in order
    pub fn hash_all<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Hash {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    /// Double SHA-256, as used for chain transaction and block ids
    pub fn double_hash(data: &[u8]) -> Hash {
        sha256(&sha256(data))
    }
}
