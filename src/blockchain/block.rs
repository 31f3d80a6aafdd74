use chrono::{DateTime, Utc};
use serde::Serialize;

use std::fmt;

use super::encoding::{self, BlockFields, EncodingError};
use super::hash::BlockHash;
use super::transaction::Transaction;

/// Represents a block in the blockchain
///
/// A block has no setters: once sealed its fields never change. Its hash is
/// not stored; `hash()` always recomputes it from the current fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    /// Timestamp when the block was created
    timestamp: DateTime<Utc>,

    /// Proof of work (nonce)
    nonce: u64,

    /// Hash of the previous block
    previous_hash: BlockHash,

    /// Leading zero bits the hash was mined to
    difficulty: u32,

    /// List of transactions sealed into this block
    transactions: Vec<Transaction>,
}

impl Block {
    /// Seals a block from fields a miner has already settled on
    pub(super) fn sealed(
        nonce: u64,
        previous_hash: BlockHash,
        timestamp: DateTime<Utc>,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            timestamp,
            nonce,
            previous_hash,
            difficulty,
            transactions,
        }
    }

    /// The zero-valued block whose hash serves as the genesis sentinel
    fn empty() -> Self {
        Block::sealed(0, BlockHash::zero(), DateTime::<Utc>::UNIX_EPOCH, 0, Vec::new())
    }

    /// Previous-hash value carried by every genesis block
    pub fn genesis_previous_hash() -> Result<BlockHash, EncodingError> {
        Block::empty().hash()
    }

    /// Creates a genesis block
    ///
    /// Genesis has nonce 0 and is exempt from proof of work.
    pub fn genesis() -> Result<Self, EncodingError> {
        Ok(Block::sealed(
            0,
            Block::genesis_previous_hash()?,
            Utc::now(),
            0,
            Vec::new(),
        ))
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn previous_hash(&self) -> &BlockHash {
        &self.previous_hash
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    fn fields(&self) -> BlockFields<'_> {
        BlockFields {
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
            timestamp: &self.timestamp,
            difficulty: self.difficulty,
            transactions: &self.transactions,
        }
    }

    /// Canonical bytes of this block
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        encoding::encode_block(self.fields())
    }

    /// Calculates the SHA-256 hash of the block's canonical bytes
    pub fn hash(&self) -> Result<BlockHash, EncodingError> {
        encoding::hash_block(self.fields())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .map(|n| n.to_string())
            .unwrap_or_else(|| self.timestamp.to_rfc3339());

        writeln!(f, "timestamp        {}", nanos)?;
        writeln!(f, "nonce            {}", self.nonce)?;
        writeln!(f, "previous_hash    {}", self.previous_hash)?;
        writeln!(f, "difficulty       {}", self.difficulty)?;
        for transaction in &self.transactions {
            write!(f, "{}", transaction)?;
        }
        Ok(())
    }
}
