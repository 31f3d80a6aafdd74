use chrono::{DateTime, Utc};
use log::debug;
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::block::Block;
use super::encoding::{self, BlockFields, EncodingError};
use super::hash::{BlockHash, MAX_DIFFICULTY};
use super::transaction::Transaction;

/// Errors that can occur while searching for a nonce
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining exhausted after {attempts} attempts at difficulty {difficulty}")]
    Exhausted { attempts: u64, difficulty: u32 },

    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("Invalid difficulty {0}: must be at most 256")]
    InvalidDifficulty(u32),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Bounds on a single nonce search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningLimits {
    /// Maximum number of nonces to try; `None` searches without bound
    pub max_attempts: Option<u64>,
}

/// Shared flag that stops an in-flight search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Every block field except the nonce, fixed for the duration of a search
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    previous_hash: BlockHash,
    timestamp: DateTime<Utc>,
    difficulty: u32,
    transactions: Vec<Transaction>,
}

impl BlockTemplate {
    pub fn new(
        previous_hash: BlockHash,
        timestamp: DateTime<Utc>,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        BlockTemplate {
            previous_hash,
            timestamp,
            difficulty,
            transactions,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Hash of the trial block carrying `nonce`
    pub fn hash_with_nonce(&self, nonce: u64) -> Result<BlockHash, EncodingError> {
        encoding::hash_block(BlockFields {
            nonce,
            previous_hash: &self.previous_hash,
            timestamp: &self.timestamp,
            difficulty: self.difficulty,
            transactions: &self.transactions,
        })
    }

    /// Seals the template with a nonce found by `ProofOfWork::mine_nonce`
    pub(super) fn seal(self, mined: &MinedNonce) -> Block {
        Block::sealed(
            mined.nonce,
            self.previous_hash,
            self.timestamp,
            self.difficulty,
            self.transactions,
        )
    }

    /// Gives the transactions back when the template is abandoned
    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }
}

/// A nonce satisfying the difficulty predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedNonce {
    pub nonce: u64,
    pub hash: BlockHash,
    pub attempts: u64,
}

/// Brute-force nonce search
///
/// Nonces are tried from 0 upward, so the result for a given template is
/// reproducible. One step per nonce; the cancel token is checked before each.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProofOfWork {
    limits: MiningLimits,
}

impl ProofOfWork {
    pub fn new(limits: MiningLimits) -> Self {
        ProofOfWork { limits }
    }

    /// Finds the first nonce whose block hash meets the template's difficulty
    pub fn mine_nonce(
        &self,
        template: &BlockTemplate,
        cancel: &CancelToken,
    ) -> Result<MinedNonce, MiningError> {
        let difficulty = template.difficulty();
        if difficulty > MAX_DIFFICULTY {
            return Err(MiningError::InvalidDifficulty(difficulty));
        }

        let max_attempts = self.limits.max_attempts.unwrap_or(u64::MAX);
        let mut nonce: u64 = 0;

        loop {
            if nonce >= max_attempts {
                return Err(MiningError::Exhausted {
                    attempts: nonce,
                    difficulty,
                });
            }
            if cancel.is_cancelled() {
                return Err(MiningError::Cancelled { attempts: nonce });
            }

            let hash = template.hash_with_nonce(nonce)?;
            if hash.meets_difficulty(difficulty) {
                debug!(
                    "Found nonce {} at difficulty {} after {} attempts",
                    nonce,
                    difficulty,
                    nonce + 1
                );
                return Ok(MinedNonce {
                    nonce,
                    hash,
                    attempts: nonce + 1,
                });
            }

            nonce += 1;
        }
    }
}
