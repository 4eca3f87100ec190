use crate::core::{merkle_root, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    hash: Vec<u8>,
    pre_block_hash: Vec<u8>, // Empty for genesis
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
    difficulty: u32,
}

impl Block {
    /// Mines a block over `transactions` linked to `pre_block_hash`
    pub fn new_block(
        pre_block_hash: &[u8],
        transactions: &[Transaction],
        height: usize,
        difficulty: u32,
    ) -> Result<Block> {
        Self::new_block_with_cancel(
            pre_block_hash,
            transactions,
            height,
            difficulty,
            &AtomicBool::new(false),
        )
    }

    /// [`new_block`](Self::new_block) with a cancellation flag checked during
    /// the nonce search
    pub fn new_block_with_cancel(
        pre_block_hash: &[u8],
        transactions: &[Transaction],
        height: usize,
        difficulty: u32,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let merkle_root = merkle_root(transactions)?;

        info!("Starting proof-of-work for block at height {height} with difficulty {difficulty}");
        let pow = ProofOfWork::new_proof_of_work(pre_block_hash, &merkle_root, difficulty);
        let (nonce, hash) = pow.run_with_cancel(cancel)?;
        info!(
            "Proof-of-work completed for block: {} (nonce: {nonce})",
            HEXLOWER.encode(&hash)
        );

        Ok(Block {
            hash,
            pre_block_hash: pre_block_hash.to_vec(),
            transactions: transactions.to_vec(),
            nonce,
            height,
            difficulty,
        })
    }

    pub fn generate_genesis_block(transaction: &Transaction, difficulty: u32) -> Result<Block> {
        Block::new_block(&[], std::slice::from_ref(transaction), 0, difficulty)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Merkle root recomputed from the block's transactions
    pub fn merkle_root(&self) -> Result<Vec<u8>> {
        merkle_root(&self.transactions)
    }

    #[cfg(test)]
    pub(crate) fn with_nonce(&self, nonce: i64) -> Block {
        Block {
            nonce,
            ..self.clone()
        }
    }

    #[cfg(test)]
    pub(crate) fn with_hash(&self, hash: Vec<u8>) -> Block {
        Block {
            hash,
            ..self.clone()
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============ Block {} ============", HEXLOWER.encode(&self.hash))?;
        writeln!(f, "Height: {}", self.height)?;
        writeln!(f, "Prev. block: {}", HEXLOWER.encode(&self.pre_block_hash))?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        writeln!(f, "Difficulty: {}", self.difficulty)?;
        writeln!(f, "PoW: {}", ProofOfWork::validate(self))?;
        for tx in &self.transactions {
            write!(f, "{tx}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    #[test]
    fn test_genesis_block() {
        let address = Wallet::new().unwrap().get_address();
        let coinbase = Transaction::new_coinbase_tx(&address, None).unwrap();
        let genesis = Block::generate_genesis_block(&coinbase, 8).unwrap();

        assert!(genesis.is_genesis());
        assert_eq!(genesis.get_height(), 0);
        assert_eq!(genesis.get_difficulty(), 8);
        assert_eq!(genesis.get_transactions(), &[coinbase]);
        assert!(ProofOfWork::validate_integrity(&genesis));
    }

    #[test]
    fn test_block_links_to_parent() {
        let address = Wallet::new().unwrap().get_address();
        let first = Transaction::new_coinbase_tx(&address, None).unwrap();
        let genesis = Block::generate_genesis_block(&first, 8).unwrap();

        let second = Transaction::new_coinbase_tx(&address, None).unwrap();
        let block = Block::new_block(genesis.get_hash(), &[second], 1, 8).unwrap();
        assert!(!block.is_genesis());
        assert_eq!(block.get_pre_block_hash(), genesis.get_hash());
        assert_eq!(block.get_height(), 1);
        assert_ne!(block.get_hash(), genesis.get_hash());
    }

    #[test]
    fn test_empty_block_is_rejected() {
        assert!(matches!(
            Block::new_block(&[], &[], 0, 8),
            Err(BlockchainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_cancelled_block_is_not_built() {
        let address = Wallet::new().unwrap().get_address();
        let coinbase = Transaction::new_coinbase_tx(&address, None).unwrap();
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            Block::new_block_with_cancel(&[], &[coinbase], 0, 8, &cancel),
            Err(BlockchainError::MiningCancelled)
        ));
    }

    #[test]
    fn test_serialization_round_trip() {
        let address = Wallet::new().unwrap().get_address();
        let coinbase = Transaction::new_coinbase_tx(&address, None).unwrap();
        let block = Block::generate_genesis_block(&coinbase, 8).unwrap();

        let bytes = block.serialize().unwrap();
        assert_eq!(Block::deserialize(&bytes).unwrap(), block);
        assert!(matches!(
            Block::deserialize(&bytes[..bytes.len() / 2]),
            Err(BlockchainError::CorruptData(_))
        ));
    }
}
