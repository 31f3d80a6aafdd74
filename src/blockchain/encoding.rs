// Canonical encoding
//
// The hashed form of a block is defined here, independently of the in-memory
// `Block` and `Transaction` types. Field names and order are fixed by the
// record structs below; changing them changes every block hash.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

use super::hash::BlockHash;
use super::transaction::Transaction;

/// Errors that can occur while producing canonical bytes
#[derive(Debug, Error)]
#[error("Encoding error: {0}")]
pub struct EncodingError(#[from] serde_json::Error);

#[derive(Serialize)]
struct TransactionRecord<'a> {
    sender_blockchain_address: &'a str,
    recipient_blockchain_address: &'a str,
    #[serde(serialize_with = "serialize_value")]
    value: f64,
}

// JSON has no non-finite numbers and serde_json writes them all as `null`.
// Tag them as strings instead; NaN carries its bit pattern.
fn serialize_value<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str(&format!("NaN:{:016x}", value.to_bits()))
    } else if value.is_sign_positive() {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}

impl<'a> From<&'a Transaction> for TransactionRecord<'a> {
    fn from(transaction: &'a Transaction) -> Self {
        TransactionRecord {
            sender_blockchain_address: transaction.sender().as_str(),
            recipient_blockchain_address: transaction.recipient().as_str(),
            value: transaction.value(),
        }
    }
}

#[derive(Serialize)]
struct BlockRecord<'a> {
    timestamp: &'a DateTime<Utc>,
    nonce: u64,
    previous_hash: &'a BlockHash,
    difficulty: u32,
    transactions: Vec<TransactionRecord<'a>>,
}

/// Block fields borrowed for encoding
///
/// Lets the miner encode trial nonces without building a `Block` per attempt.
#[derive(Debug, Clone, Copy)]
pub struct BlockFields<'a> {
    pub nonce: u64,
    pub previous_hash: &'a BlockHash,
    pub timestamp: &'a DateTime<Utc>,
    pub difficulty: u32,
    pub transactions: &'a [Transaction],
}

/// Encodes a block's fields to canonical bytes
pub fn encode_block(fields: BlockFields<'_>) -> Result<Vec<u8>, EncodingError> {
    let record = BlockRecord {
        timestamp: fields.timestamp,
        nonce: fields.nonce,
        previous_hash: fields.previous_hash,
        difficulty: fields.difficulty,
        transactions: fields.transactions.iter().map(TransactionRecord::from).collect(),
    };

    Ok(serde_json::to_vec(&record)?)
}

/// Hashes a block's canonical bytes
pub fn hash_block(fields: BlockFields<'_>) -> Result<BlockHash, EncodingError> {
    encode_block(fields).map(|bytes| BlockHash::digest(&bytes))
}

/// Encodes a transaction to canonical bytes
pub fn encode_transaction(transaction: &Transaction) -> Result<Vec<u8>, EncodingError> {
    Ok(serde_json::to_vec(&TransactionRecord::from(transaction))?)
}
