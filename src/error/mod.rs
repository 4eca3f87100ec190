//! Error handling for the ledger
//!
//! Recoverable conditions (missing records, insufficient funds, rejected
//! transactions) are returned as [`BlockchainError`]. Broken internal
//! invariants are assertions and never reach this type.

use sled::transaction::TransactionError;
use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Error)]
pub enum BlockchainError {
    /// A block, transaction or the chain itself is missing
    #[error("Not found: {0}")]
    NotFound(String),
    /// Chain state already present where a fresh one was requested
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },
    /// A transaction failed signature or balance verification
    #[error("Transaction verification failed: {0}")]
    VerificationFailed(String),
    /// An input refers to an output that is already spent
    #[error("Double spend: {0}")]
    DoubleSpend(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    /// A persisted record could not be decoded
    #[error("Corrupt data: {0}")]
    CorruptData(String),
    #[error("Transaction error: {0}")]
    Transaction(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Wallet error: {0}")]
    Wallet(String),
    #[error("Cryptographic error: {0}")]
    Crypto(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Configuration error: {0}")]
    Config(String),
    /// The caller abandoned the nonce search
    #[error("Mining cancelled")]
    MiningCancelled,
    #[error("Mining error: {0}")]
    Mining(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: TransactionError<BlockchainError>) -> Self {
        match err {
            // The closure's own error survives the rollback unchanged
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => BlockchainError::Database(e.to_string()),
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::CorruptData(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
