//! Data storage and persistence
//!
//! The UTXO index kept next to the blocks in the chain's Sled database.

pub mod utxo_set;

pub use utxo_set::{UTXOSet, UnspentOutput, UtxoMap, UTXO_PREFIX};
