//! Primitives shared by every b_verify crate.
//!
//! - SHA-256 digests ([`Sha256Hasher`], [`sha256`])
//! - secp256k1 keys and compact 64-byte signatures ([`PrivateKey`], [`PublicKey`], [`Signature`])
//! - Bitcoin-style compact integers and length-prefixed byte strings ([`varint`])

mod error;
mod hasher;
mod keys;
pub mod varint;

pub use error::{PrimitiveError, Result};
pub use hasher::{sha256, Sha256Hasher};
pub use keys::{PrivateKey, PublicKey, Signature, PUBLIC_KEY_LEN, SIGNATURE_LEN};

/// 32-byte digest
pub type Hash = [u8; 32];

/// 32-byte dictionary key (a log identifier)
pub type Key = [u8; 32];

/// Length of a digest in bytes
pub const HASH_LEN: usize = 32;

/// Hash of an empty leaf: 32 zero bytes
pub const EMPTY_HASH: Hash = [0u8; 32];

/// Returns the `index`-th bit of `key`, most significant bit of the first
/// byte first. `true` selects the right branch.
#[inline]
pub fn key_bit(key: &[u8], index: usize) -> bool {
    (key[index / 8] >> (7 - (index % 8))) & 1 == 1
}

/// Short hex form of a digest for log lines
pub fn short_hex(hash: &[u8]) -> String {
    hex::encode(&hash[..hash.len().min(8)])
}
