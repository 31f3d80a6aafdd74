use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::encoding::EncodingError;
use crate::blockchain::{
    Block, Blockchain, BlockchainError, CancelToken, MiningError, Transaction,
};

use super::schema::DateTimeUtc;

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// A block together with its derived hash
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockResponse {
    /// Hash of this block (hex)
    pub hash: String,

    /// Proof of work (nonce)
    pub nonce: u64,

    /// Hash of the previous block (hex)
    pub previous_hash: String,

    /// Timestamp when the block was created
    pub timestamp: DateTimeUtc,

    /// Leading zero bits the hash was mined to
    pub difficulty: u32,

    /// Transactions sealed into the block
    pub transactions: Vec<Transaction>,
}

impl TryFrom<&Block> for BlockResponse {
    type Error = EncodingError;

    fn try_from(block: &Block) -> Result<Self, Self::Error> {
        Ok(BlockResponse {
            hash: block.hash()?.to_hex(),
            nonce: block.nonce(),
            previous_hash: block.previous_hash().to_hex(),
            timestamp: (*block.timestamp()).into(),
            difficulty: block.difficulty(),
            transactions: block.transactions().to_vec(),
        })
    }
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<BlockResponse>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub value: f64,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: usize,
}

/// Request for the mine endpoint
#[derive(Default, Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// Leading zero bits required; the configured difficulty when omitted
    #[serde(default)]
    pub difficulty: Option<u32>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: BlockResponse,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    /// Whether the chain is valid
    pub valid: bool,

    /// Index of the first invalid block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_index: Option<usize>,

    /// Why that block is invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn error_response(status: actix_web::http::StatusCode, message: String) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

fn internal_error(err: impl std::fmt::Display) -> HttpResponse {
    error!("Request failed: {}", err);
    error_response(
        actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        err.to_string(),
    )
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let (chain, validation) = blockchain.validated_chain();
    let is_valid = validation.is_ok();

    let blocks: Result<Vec<BlockResponse>, _> = chain.iter().map(BlockResponse::try_from).collect();
    match blocks {
        Ok(blocks) => HttpResponse::Ok().json(ChainResponse {
            length: blocks.len(),
            chain: blocks,
            is_valid,
        }),
        Err(err) => internal_error(err),
    }
}

/// Get the last block
///
/// Returns the most recently appended block
#[utoipa::path(
    get,
    path = "/api/v1/blocks/last",
    responses(
        (status = 200, description = "Last block retrieved successfully", body = BlockResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_last_block(blockchain: BlockchainData) -> impl Responder {
    let block = match blockchain.last_block() {
        Ok(block) => block,
        Err(err) => return internal_error(err),
    };

    match BlockResponse::try_from(&block) {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(err) => internal_error(err),
    }
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(blockchain.pending_transactions())
}

/// Create a new transaction
///
/// Adds a new transaction to the pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data")
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let TransactionRequest {
        sender,
        recipient,
        value,
    } = transaction_req.into_inner();

    let block_index = blockchain.add_transaction(sender, recipient, value);

    HttpResponse::Created().json(TransactionResponse {
        message: format!("Transaction will be added to Block {}", block_index),
        block_index,
    })
}

/// Mine a new block
///
/// Seals all pending transactions into a new block. Mining runs on the
/// blocking thread pool so transaction submission stays responsive.
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid difficulty"),
        (status = 422, description = "Mining gave up before finding a nonce"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    let chain = blockchain.get_ref().clone();
    let difficulty = mine_req.difficulty;
    let guard = CancelOnDrop(CancelToken::new());
    let cancel = guard.0.clone();

    let mined = web::block(move || match difficulty {
        Some(difficulty) => chain.create_block_with_cancel(difficulty, &cancel),
        None => chain.mine_pending(&cancel),
    })
    .await;
    drop(guard);

    let block = match mined {
        Ok(Ok(block)) => block,
        Ok(Err(BlockchainError::MiningError(err @ MiningError::InvalidDifficulty(_)))) => {
            return error_response(actix_web::http::StatusCode::BAD_REQUEST, err.to_string());
        }
        Ok(Err(BlockchainError::MiningError(
            err @ (MiningError::Exhausted { .. } | MiningError::Cancelled { .. }),
        ))) => {
            return error_response(
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                err.to_string(),
            );
        }
        Ok(Err(err)) => return internal_error(err),
        Err(err) => return internal_error(err),
    };

    match BlockResponse::try_from(&block) {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Err(err) => internal_error(err),
    }
}

// Stops the search if the request future is dropped before mining finishes
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain and reports the first invalid block
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    let response = match blockchain.validate_chain() {
        Ok(()) => ValidationResponse {
            valid: true,
            invalid_index: None,
            reason: None,
        },
        Err(err) => ValidationResponse {
            valid: false,
            invalid_index: Some(err.index),
            reason: Some(err.kind.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Dump the blockchain
///
/// Returns a plain-text listing of every block and its transactions
#[utoipa::path(
    get,
    path = "/api/v1/chain/dump",
    responses(
        (status = 200, description = "Plain-text chain dump", body = String, content_type = "text/plain")
    )
)]
pub async fn dump_chain(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(blockchain.to_string())
}
