//! Request and reply payloads that are not log statements

use bverify_primitives::{
    varint::{read_varint, take_array, varint_len, write_varint},
    Hash, Key, EMPTY_HASH, HASH_LEN,
};

use crate::{frame::MAX_PAYLOAD_LEN, Result, WireError};

/// Keys named by `RequestProof` and `RequestDeltaProof`.
///
/// Encoded as a varint count followed by the 32-byte keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyList(pub Vec<Key>);

impl KeyList {
    /// Wrap a list of dictionary keys
    pub fn new(keys: impl Into<Vec<Key>>) -> Self {
        Self(keys.into())
    }

    /// No keys named
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Varint count followed by the raw keys
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(varint_len(self.0.len() as u64) + self.0.len() * HASH_LEN);
        write_varint(&mut out, self.0.len() as u64);
        for key in &self.0 {
            out.extend_from_slice(key);
        }
        out
    }

    /// Decode, checking the count against the bytes that follow
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let count = read_varint(&mut input).map_err(WireError::field("key count"))?;
        if count > (MAX_PAYLOAD_LEN / HASH_LEN) as u64 || input.len() as u64 != count * HASH_LEN as u64 {
            return Err(WireError::malformed(
                "key list",
                format!("{count} keys declared, {} bytes follow", input.len()),
            ));
        }
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            keys.push(take_array::<HASH_LEN>(&mut input).map_err(WireError::field("key"))?);
        }
        Ok(Self(keys))
    }
}

impl From<Vec<Key>> for KeyList {
    fn from(keys: Vec<Key>) -> Self {
        Self(keys)
    }
}

/// Payload of `ProofUpdate` and `DeltaProof`: the commitment a delta
/// leads to, followed by the encoded delta trie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofUpdate {
    /// Root the client ends up at after applying `delta`
    pub commitment: Hash,
    /// Serialized delta trie
    pub delta: Vec<u8>,
}

impl ProofUpdate {
    /// Pair a commitment with its encoded delta
    pub fn new(commitment: Hash, delta: Vec<u8>) -> Self {
        Self { commitment, delta }
    }

    /// Commitment followed by the delta bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HASH_LEN + self.delta.len());
        out.extend_from_slice(&self.commitment);
        out.extend_from_slice(&self.delta);
        out
    }

    /// Split off the commitment; the rest must be a non-empty delta
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let commitment = take_array::<HASH_LEN>(&mut input).map_err(WireError::field("commitment"))?;
        if input.is_empty() {
            return Err(WireError::malformed("proof update", "missing delta"));
        }
        Ok(Self { commitment, delta: input.to_vec() })
    }
}

/// A commitment named in a request; all zeros on the wire means none
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitmentRef(pub Option<Hash>);

impl CommitmentRef {
    /// Zeros stand in for `None`
    pub fn to_bytes(&self) -> [u8; HASH_LEN] {
        self.0.unwrap_or(EMPTY_HASH)
    }

    /// Decode exactly 32 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: Hash = bytes.try_into().map_err(|_| {
            WireError::malformed("commitment reference", format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self((raw != EMPTY_HASH).then_some(raw)))
    }
}

impl From<Option<Hash>> for CommitmentRef {
    fn from(commitment: Option<Hash>) -> Self {
        Self(commitment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_list() {
        let list = KeyList::new(vec![[1u8; 32], [2u8; 32]]);
        let bytes = list.to_bytes();
        assert_eq!(bytes.len(), 1 + 64);
        assert_eq!(bytes[0], 2);
        assert_eq!(KeyList::from_bytes(&bytes).unwrap(), list);

        let empty = KeyList::default();
        assert_eq!(empty.to_bytes(), vec![0]);
        assert!(KeyList::from_bytes(&[0]).unwrap().is_empty());
    }

    #[test]
    fn test_key_list_length_mismatch() {
        let mut bytes = KeyList::new(vec![[1u8; 32]]).to_bytes();
        bytes.push(0);
        assert!(KeyList::from_bytes(&bytes).is_err());
        assert!(KeyList::from_bytes(&bytes[..20]).is_err());
        assert!(KeyList::from_bytes(&[]).is_err());
        // count far beyond what a frame can carry
        assert!(KeyList::from_bytes(&[0xFE, 0xFF, 0xFF, 0xFF, 0x00]).is_err());
    }

    #[test]
    fn test_proof_update() {
        let update = ProofUpdate::new([9u8; 32], vec![3, 0, 0]);
        let bytes = update.to_bytes();
        assert_eq!(&bytes[..32], &[9u8; 32]);
        assert_eq!(ProofUpdate::from_bytes(&bytes).unwrap(), update);
        assert!(ProofUpdate::from_bytes(&bytes[..32]).is_err());
        assert!(ProofUpdate::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_commitment_ref() {
        assert_eq!(CommitmentRef(None).to_bytes(), EMPTY_HASH);
        assert_eq!(CommitmentRef::from_bytes(&EMPTY_HASH).unwrap(), CommitmentRef(None));
        assert_eq!(CommitmentRef::from_bytes(&[5u8; 32]).unwrap(), CommitmentRef(Some([5u8; 32])));
        assert!(CommitmentRef::from_bytes(&[5u8; 31]).is_err());
    }
}
