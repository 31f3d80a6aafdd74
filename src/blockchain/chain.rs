use chrono::Utc;
use log::{info, warn};
use thiserror::Error;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::block::Block;
use super::encoding::EncodingError;
use super::hash::BlockHash;
use super::pool::TransactionPool;
use super::pow::{BlockTemplate, CancelToken, MiningError, MiningLimits, ProofOfWork};
use super::transaction::{Address, Transaction};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Chain has no blocks")]
    EmptyChain,

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),

    #[error(transparent)]
    EncodingError(#[from] EncodingError),

    #[error("Invalid chain: {0}")]
    InvalidChain(#[from] ChainValidationError),
}

/// Why a block failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidBlockKind {
    /// Genesis does not carry the sentinel previous hash, nonce 0, difficulty 0
    /// and no transactions
    BadGenesis,

    /// Stored previous hash differs from the recomputed hash of the prior block
    BrokenLink { expected: BlockHash, found: BlockHash },

    /// Block hash has fewer leading zero bits than its recorded difficulty
    InsufficientWork { required: u32, found: u32 },

    /// Block timestamp is earlier than its predecessor's
    TimestampRegression,

    /// Block could not be encoded for hashing
    Encoding(String),
}

impl fmt::Display for InvalidBlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidBlockKind::BadGenesis => write!(f, "malformed genesis block"),
            InvalidBlockKind::BrokenLink { expected, found } => {
                write!(f, "previous hash {} does not match {}", found, expected)
            }
            InvalidBlockKind::InsufficientWork { required, found } => write!(
                f,
                "hash has {} leading zero bits, difficulty requires {}",
                found, required
            ),
            InvalidBlockKind::TimestampRegression => {
                write!(f, "timestamp precedes previous block")
            }
            InvalidBlockKind::Encoding(reason) => write!(f, "{}", reason),
        }
    }
}

/// Chain validation failure, identifying the first offending block
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("block {index}: {kind}")]
pub struct ChainValidationError {
    pub index: usize,
    pub kind: InvalidBlockKind,
}

impl ChainValidationError {
    fn new(index: usize, kind: InvalidBlockKind) -> Self {
        ChainValidationError { index, kind }
    }

    fn encoding(index: usize, err: EncodingError) -> Self {
        ChainValidationError::new(index, InvalidBlockKind::Encoding(err.to_string()))
    }
}

/// Core-side configuration of a blockchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Default mining difficulty (number of leading zero bits)
    pub difficulty: u32,

    /// Cap on nonces tried per block; `None` is unbounded
    pub max_mining_attempts: Option<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            difficulty: 4,
            max_mining_attempts: None,
        }
    }
}

/// Represents the blockchain
///
/// Clones share state. Block creation is serialized by an internal
/// mining lock; mining itself runs with neither the pool nor the chain locked,
/// so `add_transaction` stays responsive during a search.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks
    chain: Arc<Mutex<Vec<Block>>>,

    /// Pending transactions to be included in the next block
    pool: TransactionPool,

    /// Held for the whole of drain + mine + append
    mining: Arc<Mutex<()>>,

    /// Proof of work search
    pow: ProofOfWork,

    /// Mining difficulty used by `mine_pending`
    difficulty: u32,
}

// Blocks are only ever pushed whole, so a poisoned chain lock still guards a
// consistent Vec.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Blockchain {
    /// Creates a new blockchain with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty and mining limits
    ///
    /// # Returns
    ///
    /// A new Blockchain instance, or an error if the genesis block cannot be built
    pub fn with_config(config: ChainConfig) -> Result<Self, BlockchainError> {
        let blockchain = Blockchain {
            chain: Arc::new(Mutex::new(Vec::new())),
            pool: TransactionPool::new(),
            mining: Arc::new(Mutex::new(())),
            pow: ProofOfWork::new(MiningLimits {
                max_attempts: config.max_mining_attempts,
            }),
            difficulty: config.difficulty,
        };

        blockchain.create_genesis_block()?;
        blockchain.validate_chain()?;

        Ok(blockchain)
    }

    /// Creates the genesis block (first block in the chain)
    fn create_genesis_block(&self) -> Result<(), BlockchainError> {
        let genesis = Block::genesis()?;
        info!("Created genesis block {}", genesis.hash()?);

        lock(&self.chain).push(genesis);
        Ok(())
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Result<Block, BlockchainError> {
        lock(&self.chain)
            .last()
            .cloned()
            .ok_or(BlockchainError::EmptyChain)
    }

    /// Adds a new transaction to the pending transactions
    ///
    /// No validation is applied to the addresses or the value.
    ///
    /// # Returns
    ///
    /// The index of the next block to be appended, read together with the
    /// push. Advisory: if a search is already in flight, that block was drained
    /// before this call and the transaction lands in the one after it.
    pub fn add_transaction(
        &self,
        sender: impl Into<Address>,
        recipient: impl Into<Address>,
        value: f64,
    ) -> usize {
        let transaction = Transaction::new(sender, recipient, value);
        let (next_index, pending) = {
            // Chain before pool; nothing takes them in the other order
            let chain = lock(&self.chain);
            (chain.len(), self.pool.add(transaction))
        };

        info!(
            "Queued transaction for block {} ({} pending)",
            next_index, pending
        );
        next_index
    }

    /// Mines the pending transactions at the configured difficulty
    pub fn mine_pending(&self, cancel: &CancelToken) -> Result<Block, BlockchainError> {
        self.create_block_with_cancel(self.difficulty, cancel)
    }

    #[cfg(test)]
    pub fn create_block(&self, difficulty: u32) -> Result<Block, BlockchainError> {
        self.create_block_with_cancel(difficulty, &CancelToken::new())
    }

    /// Mines a new block with the pending transactions
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Leading zero bits the new block's hash must have
    /// * `cancel` - Stops the nonce search early when triggered
    ///
    /// On any failure the drained transactions go back to the front of the
    /// pool, so the pool is only emptied by a block that actually gets sealed.
    pub fn create_block_with_cancel(
        &self,
        difficulty: u32,
        cancel: &CancelToken,
    ) -> Result<Block, BlockchainError> {
        let _mining = lock(&self.mining);

        let last_block = self.last_block()?;
        let previous_hash = last_block.hash()?;
        let timestamp = Utc::now().max(*last_block.timestamp());
        let transactions = self.pool.drain();

        let template = BlockTemplate::new(previous_hash, timestamp, difficulty, transactions);

        let mined = match self.pow.mine_nonce(&template, cancel) {
            Ok(mined) => mined,
            Err(err) => {
                warn!("Mining failed, returning transactions to pool: {}", err);
                self.pool.restore(template.into_transactions());
                return Err(err.into());
            }
        };

        let block = template.seal(&mined);
        let index = {
            let mut chain = lock(&self.chain);
            chain.push(block.clone());
            chain.len() - 1
        };

        info!(
            "Mined block {} with {} transactions: nonce {}, hash {}",
            index,
            block.transactions().len(),
            mined.nonce,
            mined.hash
        );

        Ok(block)
    }

    /// Gets the entire blockchain
    pub fn chain(&self) -> Vec<Block> {
        lock(&self.chain).clone()
    }

    /// Gets all pending transactions
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pool.snapshot()
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// The first offending block index and reason, if any
    pub fn validate_chain(&self) -> Result<(), ChainValidationError> {
        validate_blocks(&lock(&self.chain))
    }

    /// Copies the chain and validates that same copy under one lock
    pub fn validated_chain(&self) -> (Vec<Block>, Result<(), ChainValidationError>) {
        let chain = lock(&self.chain);
        let validation = validate_blocks(&chain);
        if let Err(err) = &validation {
            warn!("Chain validation failed at {}", err);
        }
        (chain.clone(), validation)
    }
}

/// Validates a sequence of blocks as a chain
pub fn validate_blocks(blocks: &[Block]) -> Result<(), ChainValidationError> {
    let genesis = blocks.first().ok_or_else(|| {
        ChainValidationError::new(0, InvalidBlockKind::BadGenesis)
    })?;

    let sentinel =
        Block::genesis_previous_hash().map_err(|e| ChainValidationError::encoding(0, e))?;
    if *genesis.previous_hash() != sentinel
        || genesis.nonce() != 0
        || genesis.difficulty() != 0
        || !genesis.transactions().is_empty()
    {
        return Err(ChainValidationError::new(0, InvalidBlockKind::BadGenesis));
    }

    let mut previous_hash = genesis
        .hash()
        .map_err(|e| ChainValidationError::encoding(0, e))?;

    for (index, pair) in blocks.windows(2).enumerate() {
        let index = index + 1;
        let (previous, current) = (&pair[0], &pair[1]);

        if *current.previous_hash() != previous_hash {
            return Err(ChainValidationError::new(
                index,
                InvalidBlockKind::BrokenLink {
                    expected: previous_hash,
                    found: *current.previous_hash(),
                },
            ));
        }

        if current.timestamp() < previous.timestamp() {
            return Err(ChainValidationError::new(
                index,
                InvalidBlockKind::TimestampRegression,
            ));
        }

        let hash = current
            .hash()
            .map_err(|e| ChainValidationError::encoding(index, e))?;
        if !hash.meets_difficulty(current.difficulty()) {
            return Err(ChainValidationError::new(
                index,
                InvalidBlockKind::InsufficientWork {
                    required: current.difficulty(),
                    found: hash.leading_zero_bits(),
                },
            ));
        }

        previous_hash = hash;
    }

    Ok(())
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(25);
        for (index, block) in self.chain().iter().enumerate() {
            writeln!(f, "{} Chain {} {}", rule, index, rule)?;
            write!(f, "{}", block)?;
        }
        writeln!(f, "{}", "*".repeat(25))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::{Duration, Instant};

    fn test_chain() -> Blockchain {
        Blockchain::with_config(ChainConfig {
            difficulty: 0,
            max_mining_attempts: None,
        })
        .unwrap()
    }

    /// Replaces the block at `index`, bypassing mining
    fn tamper(blockchain: &Blockchain, index: usize, f: impl FnOnce(&Block) -> Block) {
        let mut chain = lock(&blockchain.chain);
        chain[index] = f(&chain[index]);
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = test_chain();
        let chain = blockchain.chain();

        assert_eq!(chain.len(), 1);
        let genesis = &chain[0];
        assert_eq!(genesis.nonce(), 0);
        assert!(genesis.transactions().is_empty());
        assert_eq!(
            *genesis.previous_hash(),
            Block::genesis_previous_hash().unwrap()
        );
        assert!(blockchain.validate_chain().is_ok());
        assert!(blockchain.validate_chain().is_ok());
    }

    #[test]
    fn test_last_block_is_genesis_initially() {
        let blockchain = test_chain();
        assert_eq!(blockchain.last_block().unwrap(), blockchain.chain()[0]);
    }

    #[test]
    fn test_last_block_on_empty_chain() {
        let blockchain = test_chain();
        lock(&blockchain.chain).clear();

        assert!(matches!(
            blockchain.last_block(),
            Err(BlockchainError::EmptyChain)
        ));
        assert!(matches!(
            blockchain.create_block(0),
            Err(BlockchainError::EmptyChain)
        ));
    }

    #[test]
    fn test_create_block_seals_pending_transaction() {
        let blockchain = test_chain();

        assert_eq!(blockchain.add_transaction("A", "B", 1.0), 1);
        assert_eq!(blockchain.pending_transactions().len(), 1);

        let block = blockchain.create_block(0).unwrap();

        assert_eq!(block.transactions(), &[Transaction::new("A", "B", 1.0)]);
        assert!(blockchain.pending_transactions().is_empty());
        assert_eq!(blockchain.chain().len(), 2);
        assert_eq!(blockchain.last_block().unwrap(), block);
    }

    #[test]
    fn test_empty_blocks_still_link() {
        let blockchain = test_chain();

        let first = blockchain.create_block(0).unwrap();
        let second = blockchain.create_block(0).unwrap();

        assert!(second.transactions().is_empty());
        assert_eq!(*second.previous_hash(), first.hash().unwrap());
        assert!(blockchain.validate_chain().is_ok());
    }

    #[test]
    fn test_chain_link_invariant() {
        let blockchain = test_chain();
        for i in 0..5 {
            blockchain.add_transaction("A", "B", i as f64);
            blockchain.create_block(i % 3).unwrap();
        }

        let chain = blockchain.chain();
        for i in 1..chain.len() {
            assert_eq!(*chain[i].previous_hash(), chain[i - 1].hash().unwrap());
            assert!(chain[i].timestamp() >= chain[i - 1].timestamp());
        }
        assert!(blockchain.validate_chain().is_ok());
    }

    #[test]
    fn test_difficulty_is_satisfied() {
        let blockchain = test_chain();
        blockchain.add_transaction("A", "B", 1.0);

        let block = blockchain.create_block(8).unwrap();
        let hash = block.hash().unwrap();

        assert_eq!(block.difficulty(), 8);
        assert!(hash.leading_zero_bits() >= 8);
        assert!(hash.to_hex().starts_with("00"));
        assert!(blockchain.validate_chain().is_ok());
    }

    #[test]
    fn test_mine_pending_uses_configured_difficulty() {
        let blockchain = Blockchain::with_config(ChainConfig {
            difficulty: 4,
            max_mining_attempts: None,
        })
        .unwrap();

        let block = blockchain.mine_pending(&CancelToken::new()).unwrap();
        assert_eq!(block.difficulty(), 4);
        assert!(block.hash().unwrap().meets_difficulty(4));
    }

    #[test]
    fn test_pool_drain_exactness() {
        let blockchain = test_chain();

        blockchain.add_transaction("A", "B", 1.0);
        blockchain.create_block(0).unwrap();

        blockchain.add_transaction("C", "D", 2.0);
        blockchain.add_transaction("X", "Y", 3.0);
        let block = blockchain.create_block(0).unwrap();

        assert_eq!(
            block.transactions(),
            &[Transaction::new("C", "D", 2.0), Transaction::new("X", "Y", 3.0)]
        );

        let sealed: Vec<Transaction> = blockchain
            .chain()
            .iter()
            .flat_map(|b| b.transactions().to_vec())
            .collect();
        assert_eq!(sealed.len(), 3);
    }

    #[test]
    fn test_exhausted_mining_keeps_transactions() {
        let blockchain = Blockchain::with_config(ChainConfig {
            difficulty: 0,
            max_mining_attempts: Some(2),
        })
        .unwrap();
        blockchain.add_transaction("A", "B", 1.0);

        let result = blockchain.create_block(256);

        assert!(matches!(
            result,
            Err(BlockchainError::MiningError(MiningError::Exhausted { attempts: 2, .. }))
        ));
        assert_eq!(blockchain.chain().len(), 1);
        assert_eq!(
            blockchain.pending_transactions(),
            vec![Transaction::new("A", "B", 1.0)]
        );

        // Retry at a reachable difficulty
        let block = blockchain.create_block(0).unwrap();
        assert_eq!(block.transactions().len(), 1);
    }

    #[test]
    fn test_cancelled_mining_keeps_transactions() {
        let blockchain = test_chain();
        blockchain.add_transaction("A", "B", 1.0);

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = blockchain.create_block_with_cancel(256, &cancel);

        assert!(matches!(
            result,
            Err(BlockchainError::MiningError(MiningError::Cancelled { .. }))
        ));
        assert_eq!(blockchain.pending_transactions().len(), 1);
    }

    #[test]
    fn test_corrupted_link_is_reported() {
        let blockchain = test_chain();
        blockchain.add_transaction("A", "B", 1.0);
        blockchain.create_block(0).unwrap();
        blockchain.create_block(0).unwrap();

        tamper(&blockchain, 1, |block| {
            Block::sealed(
                block.nonce(),
                BlockHash::digest(b"forged"),
                *block.timestamp(),
                block.difficulty(),
                block.transactions().to_vec(),
            )
        });

        assert!(blockchain.validate_chain().is_err());
        let err = blockchain.validate_chain().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(err.kind, InvalidBlockKind::BrokenLink { .. }));
    }

    #[test]
    fn test_altered_transactions_break_next_link() {
        let blockchain = test_chain();
        blockchain.add_transaction("A", "B", 1.0);
        blockchain.create_block(0).unwrap();
        blockchain.create_block(0).unwrap();

        tamper(&blockchain, 1, |block| {
            Block::sealed(
                block.nonce(),
                *block.previous_hash(),
                *block.timestamp(),
                block.difficulty(),
                vec![Transaction::new("A", "B", 100.0)],
            )
        });

        let err = blockchain.validate_chain().unwrap_err();
        assert_eq!(err.index, 2);
    }

    #[test]
    fn test_insufficient_work_is_reported() {
        let blockchain = test_chain();
        blockchain.create_block(0).unwrap();

        // Claim a difficulty the nonce was never mined for
        tamper(&blockchain, 1, |block| {
            Block::sealed(
                block.nonce(),
                *block.previous_hash(),
                *block.timestamp(),
                256,
                block.transactions().to_vec(),
            )
        });

        let err = blockchain.validate_chain().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(
            err.kind,
            InvalidBlockKind::InsufficientWork { required: 256, .. }
        ));
    }

    #[test]
    fn test_bad_genesis_is_reported() {
        let blockchain = test_chain();
        tamper(&blockchain, 0, |block| {
            Block::sealed(
                7,
                *block.previous_hash(),
                *block.timestamp(),
                0,
                Vec::new(),
            )
        });

        let err = blockchain.validate_chain().unwrap_err();
        assert_eq!(err, ChainValidationError::new(0, InvalidBlockKind::BadGenesis));
    }

    #[test]
    fn test_genesis_with_difficulty_is_rejected() {
        let blockchain = test_chain();
        tamper(&blockchain, 0, |block| {
            Block::sealed(
                0,
                *block.previous_hash(),
                *block.timestamp(),
                5,
                Vec::new(),
            )
        });

        let err = blockchain.validate_chain().unwrap_err();
        assert_eq!(err, ChainValidationError::new(0, InvalidBlockKind::BadGenesis));
    }

    #[test]
    fn test_validated_chain_matches_its_snapshot() {
        let blockchain = test_chain();
        blockchain.create_block(0).unwrap();

        let (chain, validation) = blockchain.validated_chain();
        assert_eq!(chain.len(), 2);
        assert!(validation.is_ok());

        tamper(&blockchain, 1, |block| {
            Block::sealed(
                block.nonce(),
                BlockHash::digest(b"forged"),
                *block.timestamp(),
                block.difficulty(),
                Vec::new(),
            )
        });

        let (chain, validation) = blockchain.validated_chain();
        assert_eq!(*chain[1].previous_hash(), BlockHash::digest(b"forged"));
        assert_eq!(validation.unwrap_err().index, 1);
    }

    #[test]
    fn test_submission_proceeds_while_mining() {
        let blockchain = test_chain();
        blockchain.add_transaction("A", "B", 1.0);

        let cancel = CancelToken::new();
        let miner = {
            let blockchain = blockchain.clone();
            let cancel = cancel.clone();
            thread::spawn(move || blockchain.create_block_with_cancel(256, &cancel))
        };

        // The search has started once the pool has been drained
        let deadline = Instant::now() + Duration::from_secs(10);
        while !blockchain.pending_transactions().is_empty() {
            assert!(Instant::now() < deadline, "mining never drained the pool");
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(blockchain.add_transaction("C", "D", 2.0), 1);
        assert_eq!(
            blockchain.pending_transactions(),
            vec![Transaction::new("C", "D", 2.0)]
        );
        assert_eq!(blockchain.chain().len(), 1);

        cancel.cancel();
        let result = miner.join().unwrap();

        assert!(matches!(
            result,
            Err(BlockchainError::MiningError(MiningError::Cancelled { .. }))
        ));
        assert_eq!(
            blockchain.pending_transactions(),
            vec![
                Transaction::new("A", "B", 1.0),
                Transaction::new("C", "D", 2.0)
            ]
        );
        assert_eq!(blockchain.chain().len(), 1);
    }

    #[test]
    fn test_sealed_blocks_do_not_change() {
        let blockchain = test_chain();
        blockchain.add_transaction("A", "B", 1.0);
        let block = blockchain.create_block(0).unwrap();
        let hash = block.hash().unwrap();

        blockchain.add_transaction("C", "D", 2.0);
        blockchain.create_block(0).unwrap();

        let stored = &blockchain.chain()[1];
        assert_eq!(stored, &block);
        assert_eq!(stored.hash().unwrap(), hash);
    }

    #[test]
    fn test_concurrent_submission_and_mining() {
        let blockchain = test_chain();

        let submitters: Vec<_> = (0..4)
            .map(|s| {
                let blockchain = blockchain.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        blockchain.add_transaction(format!("s{}", s), "sink", i as f64);
                    }
                })
            })
            .collect();

        let miners: Vec<_> = (0..2)
            .map(|_| {
                let blockchain = blockchain.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        blockchain.create_block(2).unwrap();
                    }
                })
            })
            .collect();

        for handle in submitters.into_iter().chain(miners) {
            handle.join().unwrap();
        }
        blockchain.create_block(0).unwrap();

        assert!(blockchain.pending_transactions().is_empty());
        assert_eq!(blockchain.chain().len(), 12);
        assert!(blockchain.validate_chain().is_ok());

        let sealed: Vec<Transaction> = blockchain
            .chain()
            .iter()
            .flat_map(|b| b.transactions().to_vec())
            .collect();
        assert_eq!(sealed.len(), 200);
        for s in 0..4 {
            let values: Vec<f64> = sealed
                .iter()
                .filter(|t| t.sender().as_str() == format!("s{}", s))
                .map(|t| t.value())
                .collect();
            assert_eq!(values, (0..50).map(|i| i as f64).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_display_dumps_every_block() {
        let blockchain = test_chain();
        blockchain.add_transaction("A", "B", 1.0);
        blockchain.create_block(0).unwrap();

        let output = blockchain.to_string();
        assert!(output.contains("Chain 0"));
        assert!(output.contains("Chain 1"));
        assert!(output.contains("recipient_blockchain_address  B"));
    }
}
