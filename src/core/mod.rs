//! Core ledger functionality
//!
//! Blocks, transactions, Merkle aggregation, proof-of-work and the chain
//! that ties them to the store.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, GENESIS_COINBASE_DATA};
pub use merkle::{merkle_root, MerkleTree};
pub use proof_of_work::ProofOfWork;
pub use transaction::{PrevTransactions, TXInput, TXOutput, Transaction, COINBASE_VOUT, SUBSIDY};
