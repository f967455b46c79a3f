//! Commitment records returned by `CommitmentDetails` and `CommitmentHistory`.
//!
//! ```text
//! commitment (32) ∥ tx hash (32, zeros if none) ∥ triggered height (u32 BE)
//!   ∥ block hash (32, zeros if none) ∥ proof length (u32 BE)
//!   ∥ merkle proof (u64 BE position ∥ 32-byte hashes) ∥ raw transaction
//! ```

use bverify_primitives::{
    varint::{take, take_array},
    Hash, Sha256Hasher, EMPTY_HASH, HASH_LEN,
};

use crate::{frame::MAX_PAYLOAD_LEN, Result, WireError};

fn optional(raw: Hash) -> Option<Hash> {
    (raw != EMPTY_HASH).then_some(raw)
}

fn read_u32(input: &mut &[u8], what: &'static str) -> Result<u32> {
    Ok(u32::from_be_bytes(take_array(input).map_err(WireError::field(what))?))
}

/// Position of a transaction in its block plus the sibling hashes up to
/// the block's merkle root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleProof {
    /// Index of the transaction in the block
    pub position: u64,
    /// Sibling hashes, leaf level first
    pub hashes: Vec<Hash>,
}

impl MerkleProof {
    /// Length of the encoding
    pub fn encoded_len(&self) -> usize {
        8 + self.hashes.len() * HASH_LEN
    }

    /// Append the position and hashes to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.position.to_be_bytes());
        for hash in &self.hashes {
            out.extend_from_slice(hash);
        }
    }

    /// An empty slice decodes to the default proof
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let mut input = bytes;
        let position = u64::from_be_bytes(take_array(&mut input).map_err(WireError::field("merkle position"))?);
        if input.len() % HASH_LEN != 0 {
            return Err(WireError::malformed("merkle proof", format!("{} stray bytes", input.len() % HASH_LEN)));
        }
        let hashes = input
            .chunks_exact(HASH_LEN)
            .map(|chunk| {
                let mut hash = EMPTY_HASH;
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();
        Ok(Self { position, hashes })
    }

    /// Fold `leaf` up the tree with double SHA-256 and compare with `root`
    pub fn check(&self, leaf: &Hash, root: &Hash) -> bool {
        let mut hash = *leaf;
        let mut index = self.position;
        for sibling in &self.hashes {
            let mut pair = [0u8; 2 * HASH_LEN];
            if index & 1 == 1 {
                pair[..HASH_LEN].copy_from_slice(sibling);
                pair[HASH_LEN..].copy_from_slice(&hash);
            } else {
                pair[..HASH_LEN].copy_from_slice(&hash);
                pair[HASH_LEN..].copy_from_slice(sibling);
            }
            hash = Sha256Hasher::double_hash(&pair);
            index >>= 1;
        }
        hash == *root
    }
}

/// A published root digest and what is known about its anchoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commitment {
    /// Root digest that was committed
    pub commitment: Hash,
    /// Hash of the transaction carrying the digest
    pub tx_hash: Option<Hash>,
    /// Server's chain height when the commit was triggered
    pub triggered_at_block_height: u32,
    /// Block the transaction was included in
    pub included_in_block: Option<Hash>,
    /// Inclusion proof of the transaction in that block
    pub merkle_proof: MerkleProof,
    /// Full transaction, so the client can recompute `tx_hash`
    pub raw_tx: Vec<u8>,
}

impl Commitment {
    /// Record for a digest that has not been published yet
    pub fn pending(commitment: Hash, triggered_at_block_height: u32) -> Self {
        Self { commitment, triggered_at_block_height, ..Default::default() }
    }

    /// Whether a block has been seen for the transaction
    pub fn is_included(&self) -> bool {
        self.included_in_block.is_some()
    }

    /// `raw_tx` hashes to `tx_hash` and carries the digest
    pub fn transaction_matches(&self) -> bool {
        self.tx_hash == Some(Sha256Hasher::double_hash(&self.raw_tx))
            && self.raw_tx.windows(HASH_LEN).any(|window| window == self.commitment)
    }

    /// Length of [`Self::to_bytes`]
    pub fn encoded_len(&self) -> usize {
        3 * HASH_LEN + 8 + self.merkle_proof.encoded_len() + self.raw_tx.len()
    }

    /// Append the encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.commitment);
        out.extend_from_slice(&self.tx_hash.unwrap_or(EMPTY_HASH));
        out.extend_from_slice(&self.triggered_at_block_height.to_be_bytes());
        out.extend_from_slice(&self.included_in_block.unwrap_or(EMPTY_HASH));
        out.extend_from_slice(&(self.merkle_proof.encoded_len() as u32).to_be_bytes());
        self.merkle_proof.encode_into(out);
        out.extend_from_slice(&self.raw_tx);
    }

    /// Encode one record
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode one record; whatever follows the merkle proof is the raw transaction
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let commitment = take_array::<HASH_LEN>(&mut input).map_err(WireError::field("commitment"))?;
        let tx_hash = take_array::<HASH_LEN>(&mut input).map_err(WireError::field("tx hash"))?;
        let triggered_at_block_height = read_u32(&mut input, "triggered height")?;
        let block = take_array::<HASH_LEN>(&mut input).map_err(WireError::field("block hash"))?;
        let proof_len = read_u32(&mut input, "merkle proof length")? as usize;
        let proof = take(&mut input, proof_len).map_err(WireError::field("merkle proof"))?;
        Ok(Self {
            commitment,
            tx_hash: optional(tx_hash),
            triggered_at_block_height,
            included_in_block: optional(block),
            merkle_proof: MerkleProof::from_bytes(proof)?,
            raw_tx: input.to_vec(),
        })
    }
}

/// Payload of a `CommitmentHistory` reply: u32 BE count, then each record
/// prefixed by its u32 BE length
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitmentHistory(pub Vec<Commitment>);

impl CommitmentHistory {
    /// Encode as many leading records as fit in one frame.
    ///
    /// Returns the payload and the number of records it holds; a client
    /// pages through the rest by asking again after the last one.
    pub fn to_frame_bytes(&self) -> (Vec<u8>, usize) {
        let wanted: usize = 4 + self.0.iter().map(|c| 4 + c.encoded_len()).sum::<usize>();
        let mut out = Vec::with_capacity(wanted.min(MAX_PAYLOAD_LEN));
        out.extend_from_slice(&[0u8; 4]);
        let mut count = 0usize;
        for record in &self.0 {
            let len = record.encoded_len();
            if out.len() + 4 + len > MAX_PAYLOAD_LEN {
                break;
            }
            out.extend_from_slice(&(len as u32).to_be_bytes());
            record.encode_into(&mut out);
            count += 1;
        }
        out[..4].copy_from_slice(&(count as u32).to_be_bytes());
        (out, count)
    }

    /// Decode a reply, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let count = read_u32(&mut input, "history count")? as usize;
        // each entry needs at least its length prefix
        if count > input.len() / 4 {
            return Err(WireError::malformed("commitment history", format!("{count} entries declared")));
        }
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_u32(&mut input, "record length")? as usize;
            let record = take(&mut input, len).map_err(WireError::field("commitment record"))?;
            records.push(Commitment::from_bytes(record)?);
        }
        if !input.is_empty() {
            return Err(WireError::malformed("commitment history", format!("{} trailing bytes", input.len())));
        }
        Ok(Self(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn included(seed: u8, raw_len: usize) -> Commitment {
        let raw_tx = vec![seed; raw_len];
        Commitment {
            commitment: [seed; 32],
            tx_hash: Some(Sha256Hasher::double_hash(&raw_tx)),
            triggered_at_block_height: 100 + seed as u32,
            included_in_block: Some([seed ^ 0xFF; 32]),
            merkle_proof: MerkleProof { position: 3, hashes: vec![[1u8; 32], [2u8; 32]] },
            raw_tx,
        }
    }

    #[test]
    fn test_record_layout() {
        let record = included(4, 10);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(&bytes[64..68], &104u32.to_be_bytes());
        assert_eq!(&bytes[100..104], &(8u32 + 64).to_be_bytes());
        assert_eq!(&bytes[104..112], &3u64.to_be_bytes());
        assert_eq!(Commitment::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_pending_record() {
        let record = Commitment::pending([9u8; 32], 7);
        let bytes = record.to_bytes();
        assert_eq!(&bytes[32..64], &EMPTY_HASH);
        let decoded = Commitment::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.tx_hash, None);
        assert_eq!(decoded.included_in_block, None);
        assert!(!decoded.is_included());
        assert!(decoded.raw_tx.is_empty());
    }

    #[test]
    fn test_truncated_record() {
        let bytes = included(1, 4).to_bytes();
        assert!(Commitment::from_bytes(&bytes[..50]).is_err());
        assert!(Commitment::from_bytes(&bytes[..110]).is_err());
    }

    #[test]
    fn test_transaction_matches() {
        let mut record = included(5, 0);
        record.raw_tx = [b"tx".as_slice(), record.commitment.as_slice()].concat();
        record.tx_hash = Some(Sha256Hasher::double_hash(&record.raw_tx));
        assert!(record.transaction_matches());
        record.raw_tx.push(0);
        assert!(!record.transaction_matches());
    }

    #[test]
    fn test_merkle_proof_check() {
        let leaf = [0xAA; 32];
        let sibling = [0xBB; 32];
        let root = Sha256Hasher::double_hash(&[sibling, leaf].concat());
        let proof = MerkleProof { position: 1, hashes: vec![sibling] };
        assert!(proof.check(&leaf, &root));
        let wrong_side = MerkleProof { position: 0, hashes: vec![sibling] };
        assert!(!wrong_side.check(&leaf, &root));
        // a lone transaction is its own root
        assert!(MerkleProof::default().check(&leaf, &leaf));
    }

    #[test]
    fn test_history_roundtrip() {
        let history = CommitmentHistory(vec![included(1, 20), included(2, 0), included(3, 5)]);
        let (bytes, count) = history.to_frame_bytes();
        assert_eq!(count, 3);
        assert_eq!(&bytes[..4], &3u32.to_be_bytes());
        assert_eq!(CommitmentHistory::from_bytes(&bytes).unwrap(), history);

        let (empty, count) = CommitmentHistory::default().to_frame_bytes();
        assert_eq!((empty.as_slice(), count), (&[0u8, 0, 0, 0][..], 0));
    }

    #[test]
    fn test_history_truncates_to_frame() {
        let history = CommitmentHistory((0..10).map(|i| included(i, 10_000)).collect());
        let (bytes, count) = history.to_frame_bytes();
        assert!(bytes.len() <= MAX_PAYLOAD_LEN);
        assert_eq!(count, 6);
        let decoded = CommitmentHistory::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.0.as_slice(), &history.0[..6]);
    }

    #[test]
    fn test_history_rejects_garbage() {
        assert!(CommitmentHistory::from_bytes(&[0, 0, 0]).is_err());
        assert!(CommitmentHistory::from_bytes(&[0, 0, 0, 9]).is_err());
        assert!(CommitmentHistory::from_bytes(&[0, 0, 0, 0, 1]).is_err());
    }
}
