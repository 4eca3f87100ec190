//! # pow-ledger
//!
//! A minimal proof-of-work ledger: transactions in the UTXO model signed with
//! ECDSA P-256, blocks summarised by a Merkle root and sealed by a nonce
//! search, and a chain persisted in Sled together with an index of unspent
//! outputs.
//!
//! ## Layout
//! - `core/`: transactions, Merkle aggregation, proof-of-work, blocks, the chain
//! - `storage/`: the UTXO index kept next to the blocks
//! - `wallet/`: key pairs, addresses and the wallet file
//! - `config/`: runtime settings
//! - `utils/`: hashing, signatures and bincode helpers
//! - `cli/`: argument parsing for the binary
//!
//! A chain is an explicit [`Blockchain`] value owning its store handle; every
//! mutation (new block, tip move, index delta) commits in one store
//! transaction.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, Settings, GLOBAL_CONFIG};
pub use core::{
    merkle_root, Block, Blockchain, BlockchainIterator, ProofOfWork, TXInput, TXOutput,
    Transaction, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use storage::{UTXOSet, UnspentOutput};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Signer, Wallet,
    Wallets,
};
