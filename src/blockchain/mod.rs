// Blockchain module
//
// This module contains the core ledger implementation including:
// - Transaction and transaction pool
// - Block structure and its canonical encoding
// - Proof of work search
// - Blockchain orchestration and validation

pub mod block;
pub mod chain;
pub mod encoding;
pub mod hash;
pub mod pool;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, ChainConfig};
pub use pow::{CancelToken, MiningError};
pub use transaction::{Address, Transaction};
