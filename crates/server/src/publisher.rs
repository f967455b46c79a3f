//! Anchoring commitments on a blockchain.
//!
//! The engine hands every new root digest to a [`ChainPublisher`]. The
//! publisher returns the transaction carrying the digest and, when it
//! already knows it, the block that included it.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use bverify_primitives::{Hash, Sha256Hasher};
use bverify_wire::MerkleProof;
use parking_lot::Mutex;
use tracing::debug;

/// Block inclusion of a commitment transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    /// Hash of the including block
    pub block_hash: Hash,
    /// Path from the transaction to the block's merkle root
    pub merkle_proof: MerkleProof,
}

/// Result of publishing one commitment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Hash of the transaction carrying the commitment
    pub tx_hash: Hash,
    /// The serialized transaction
    pub raw_tx: Vec<u8>,
    /// Set when the transaction is already in a block
    pub inclusion: Option<Inclusion>,
}

/// Writes commitments to a chain
#[async_trait]
pub trait ChainPublisher: Send + Sync + fmt::Debug {
    /// Current chain height as seen by the publisher
    fn block_height(&self) -> u32;

    /// Broadcast a transaction carrying `commitment`
    async fn publish(&self, commitment: Hash) -> Result<Publication>;

    /// Search the newest `depth` blocks for `tx_hash`
    async fn lookup(&self, _tx_hash: Hash, _depth: u32) -> Result<Option<Inclusion>> {
        Ok(None)
    }
}

/// Prefix of loopback transactions
const LOOPBACK_TAG: &[u8] = b"bverify";

#[derive(Debug)]
struct LoopbackBlock {
    hash: Hash,
    tx_hash: Hash,
}

/// In-process chain that mines every commitment into its own block.
///
/// Each block holds a single transaction, so the merkle root is the
/// transaction hash and the inclusion proof is empty.
#[derive(Debug, Default)]
pub struct LoopbackPublisher {
    blocks: Mutex<Vec<LoopbackBlock>>,
}

impl LoopbackPublisher {
    /// Empty chain at height 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw transaction the loopback chain records for `commitment`
    pub fn raw_transaction(commitment: &Hash) -> Vec<u8> {
        [LOOPBACK_TAG, commitment.as_slice()].concat()
    }
}

#[async_trait]
impl ChainPublisher for LoopbackPublisher {
    fn block_height(&self) -> u32 {
        self.blocks.lock().len() as u32
    }

    async fn publish(&self, commitment: Hash) -> Result<Publication> {
        let raw_tx = Self::raw_transaction(&commitment);
        let tx_hash = Sha256Hasher::double_hash(&raw_tx);

        let mut blocks = self.blocks.lock();
        let height = blocks.len() as u32 + 1;
        let header = [&height.to_be_bytes()[..], &tx_hash[..]].concat();
        let block_hash = Sha256Hasher::double_hash(&header);
        blocks.push(LoopbackBlock { hash: block_hash, tx_hash });
        debug!(height, "loopback block mined");

        Ok(Publication {
            tx_hash,
            raw_tx,
            inclusion: Some(Inclusion { block_hash, merkle_proof: MerkleProof::default() }),
        })
    }

    async fn lookup(&self, tx_hash: Hash, depth: u32) -> Result<Option<Inclusion>> {
        let blocks = self.blocks.lock();
        Ok(blocks
            .iter()
            .rev()
            .take(depth as usize)
            .find(|block| block.tx_hash == tx_hash)
            .map(|block| Inclusion { block_hash: block.hash, merkle_proof: MerkleProof::default() }))
    }
}
