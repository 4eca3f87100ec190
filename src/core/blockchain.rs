// This is the chain - blocks linked by hash, stored in Sled
// One key space: "lh" holds the tip hash, blocks live under their raw hash,
// and the UTXO index lives under the "utxo-" prefix (see storage::utxo_set)

use crate::config::MAX_DIFFICULTY;
use crate::core::transaction::PrevTransactions;
use crate::core::{Block, ProofOfWork, Transaction, SUBSIDY};
use crate::error::{BlockchainError, Result};
use crate::storage::{UTXOSet, UnspentOutput, UtxoMap};
use crate::wallet::Signer;
use data_encoding::HEXLOWER;
use log::{info, warn};
use sled::transaction::ConflictableTransactionResult;
use sled::Db;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

// Key holding the hash of the current tip
const TIP_BLOCK_HASH_KEY: &str = "lh";

/// Note carried by the genesis coinbase
pub const GENESIS_COINBASE_DATA: &str = "First Transaction from Genesis";

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>, // Cached copy of the "lh" record
    db: Db,
    db_path: PathBuf,
    difficulty: u32,
    // Every mutation of the store (blocks, tip, UTXO index) runs under this lock
    write_lock: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Creates a fresh chain at `db_path` whose genesis coinbase pays `genesis_address`
    pub fn create_blockchain(
        genesis_address: &str,
        db_path: impl AsRef<Path>,
        difficulty: u32,
    ) -> Result<Blockchain> {
        check_difficulty(difficulty)?;
        let path = db_path.as_ref().to_path_buf();
        let db = sled::open(&path)?;

        if db.contains_key(TIP_BLOCK_HASH_KEY)? {
            return Err(BlockchainError::AlreadyExists(format!(
                "Blockchain already exists at {}",
                path.display()
            )));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx =
            Transaction::new_coinbase_tx(genesis_address, Some(GENESIS_COINBASE_DATA.as_bytes()))?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, difficulty)?;
        let genesis_data = genesis.serialize()?;

        db.transaction(|tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
            tx_db.insert(genesis.get_hash(), genesis_data.as_slice())?;
            tx_db.insert(TIP_BLOCK_HASH_KEY, genesis.get_hash())?;
            UTXOSet::apply_block(tx_db, &genesis)?;
            Ok(())
        })?;
        db.flush()?;

        info!("Genesis block {} stored", HEXLOWER.encode(genesis.get_hash()));
        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            db,
            db_path: path,
            difficulty,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Opens the chain previously created at `db_path`
    pub fn open_blockchain(db_path: impl AsRef<Path>, difficulty: u32) -> Result<Blockchain> {
        check_difficulty(difficulty)?;
        let path = db_path.as_ref().to_path_buf();
        // Don't let sled create an empty database where no chain exists
        if !path.exists() {
            return Err(BlockchainError::NotFound(format!(
                "No existing blockchain found at {}. Create one first.",
                path.display()
            )));
        }

        let db = sled::open(&path)?;
        let tip_hash = db.get(TIP_BLOCK_HASH_KEY)?.ok_or_else(|| {
            BlockchainError::NotFound(format!(
                "No existing blockchain found at {}. Create one first.",
                path.display()
            ))
        })?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash.to_vec())),
            db,
            db_path: path,
            difficulty,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *tip_hash = new_tip_hash.to_vec();
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mines `transactions` into a block on top of the current tip
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        self.mine_block_with_cancel(transactions, &AtomicBool::new(false))
    }

    /// [`mine_block`](Self::mine_block) that gives up with `MiningCancelled`
    /// once `cancel` is raised. Nothing is written until a nonce is found.
    pub fn mine_block_with_cancel(
        &self,
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Block> {
        let tip_hash = self.get_tip_hash();
        self.validate_transactions(transactions, &tip_hash)?;

        let next_height = self.get_best_height()? + 1;
        info!(
            "Mining block at height {next_height} with {} transactions (difficulty: {})",
            transactions.len(),
            self.difficulty
        );

        let block = Block::new_block_with_cancel(
            &tip_hash,
            transactions,
            next_height,
            self.difficulty,
            cancel,
        )?;

        // The tip may have moved while we were mining; the store decides
        let became_tip = self.persist_block(&block)?;
        if became_tip {
            info!(
                "Successfully mined block: {} at height {next_height}",
                HEXLOWER.encode(block.get_hash())
            );
        } else {
            info!(
                "Mined block {} was stored but a competing tip is at least as high",
                HEXLOWER.encode(block.get_hash())
            );
        }
        Ok(block)
    }

    /// Takes a block mined elsewhere. Known blocks are ignored.
    ///
    /// The block must carry a valid proof of work at this chain's difficulty,
    /// extend a stored parent by exactly one, and hold only transactions that
    /// are valid on that parent's branch. Returns whether it became the tip.
    pub fn accept_block(&self, block: &Block) -> Result<bool> {
        if self.db.contains_key(block.get_hash())? {
            return Ok(false);
        }

        if let Err(e) = self.validate_foreign_block(block) {
            warn!("Rejected block {}: {e}", HEXLOWER.encode(block.get_hash()));
            return Err(e);
        }

        let became_tip = self.persist_block(block)?;
        info!(
            "Accepted block {} at height {} (tip: {became_tip})",
            HEXLOWER.encode(block.get_hash()),
            block.get_height()
        );
        Ok(became_tip)
    }

    fn validate_foreign_block(&self, block: &Block) -> Result<()> {
        if block.get_difficulty() != self.difficulty {
            return Err(BlockchainError::InvalidBlock(format!(
                "Difficulty {} does not match chain difficulty {}",
                block.get_difficulty(),
                self.difficulty
            )));
        }
        if !ProofOfWork::validate_integrity(block) {
            return Err(BlockchainError::InvalidBlock(
                "Proof of work does not hold".to_string(),
            ));
        }
        if block.is_genesis() {
            return Err(BlockchainError::InvalidBlock(
                "Chain already has a genesis block".to_string(),
            ));
        }

        let parent = match self.get_block(block.get_pre_block_hash()) {
            Ok(parent) => parent,
            Err(BlockchainError::NotFound(_)) => {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Unknown parent {}",
                    HEXLOWER.encode(block.get_pre_block_hash())
                )))
            }
            Err(e) => return Err(e),
        };
        if block.get_height() != parent.get_height() + 1 {
            return Err(BlockchainError::InvalidBlock(format!(
                "Height {} does not follow parent height {}",
                block.get_height(),
                parent.get_height()
            )));
        }

        self.validate_transactions(block.get_transactions(), parent.get_hash())
    }

    // Everything a block's transaction list must satisfy on top of `parent_hash`
    fn validate_transactions(
        &self,
        transactions: &[Transaction],
        parent_hash: &[u8],
    ) -> Result<()> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut coinbase_count = 0;
        for tx in transactions.iter().filter(|tx| tx.is_coinbase()) {
            coinbase_count += 1;
            match tx.output_value() {
                Some(value) if value <= SUBSIDY => {}
                _ => {
                    return Err(BlockchainError::InvalidBlock(format!(
                        "Coinbase {} pays more than the block reward",
                        HEXLOWER.encode(tx.get_id())
                    )))
                }
            }
        }
        if coinbase_count > 1 {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block contains {coinbase_count} coinbase transactions"
            )));
        }

        self.check_for_double_spending(transactions)?;

        // Unspent outputs of the branch: the index when building on the tip,
        // otherwise a rescan of the parent's ancestry
        let is_tip = parent_hash == self.get_tip_hash().as_slice();
        let branch_utxo = if is_tip {
            None
        } else {
            Some(Self::collect_utxo(self.iterator_from(parent_hash))?)
        };
        let utxo_set = UTXOSet::new(self.clone());

        for (i, tx) in transactions.iter().enumerate() {
            if tx.is_coinbase() {
                continue;
            }
            if !self.verify_transaction_from(tx, parent_hash)? {
                return Err(BlockchainError::VerificationFailed(format!(
                    "Invalid transaction {} at index {i}",
                    HEXLOWER.encode(tx.get_id())
                )));
            }

            for input in tx.get_vin() {
                let unspent = match (&branch_utxo, input.output_position()) {
                    (_, None) => false,
                    (None, Some(index)) => utxo_set.is_unspent(input.get_txid(), index)?,
                    (Some(utxo), Some(index)) => utxo
                        .get(input.get_txid())
                        .is_some_and(|outs| outs.iter().any(|out| out.get_index() == index)),
                };
                if !unspent {
                    return Err(BlockchainError::DoubleSpend(format!(
                        "Transaction {} spends {}:{} which is not unspent",
                        HEXLOWER.encode(tx.get_id()),
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }

        self.check_for_repeated_ids(transactions, parent_hash)
    }

    // The same output must not be spent twice within one block
    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(&[u8], i64)> = HashSet::new();

        for (tx_index, transaction) in transactions.iter().enumerate() {
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                if !spent_outputs.insert((input.get_txid(), input.get_vout())) {
                    return Err(BlockchainError::DoubleSpend(format!(
                        "Transaction {tx_index} spends output {}:{} already spent in this block",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    // A transaction id may appear only once on a branch. Replaying one would
    // overwrite its index entry and revive outputs already spent.
    fn check_for_repeated_ids(
        &self,
        transactions: &[Transaction],
        parent_hash: &[u8],
    ) -> Result<()> {
        let mut seen: HashSet<&[u8]> = HashSet::new();
        for transaction in transactions {
            let txid = transaction.get_id();
            if !seen.insert(txid) {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Transaction {} appears twice in the block",
                    HEXLOWER.encode(txid)
                )));
            }
            match self.find_transaction_from(txid, parent_hash) {
                Ok(_) => {
                    return Err(BlockchainError::InvalidBlock(format!(
                        "Transaction {} is already on the chain",
                        HEXLOWER.encode(txid)
                    )))
                }
                Err(BlockchainError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Stores `block` and, if its height beats the tip, moves the tip and the
    /// UTXO index along with it in the same store transaction.
    ///
    /// Equal heights keep the current tip (first seen wins).
    fn persist_block(&self, block: &Block) -> Result<bool> {
        let _guard = self.lock_writer();

        if self.db.contains_key(block.get_hash())? {
            return Ok(false);
        }

        let tip_hash = self.get_tip_hash();
        let tip_height = self.get_block(&tip_hash)?.get_height();
        let becomes_tip = block.get_height() > tip_height;
        let extends_tip = block.get_pre_block_hash() == tip_hash.as_slice();

        // Overtaking from another branch: the index is rebuilt for the new branch
        let rebuilt_index = if becomes_tip && !extends_tip {
            info!(
                "Block {} overtakes the tip from another branch, rebuilding UTXO index",
                HEXLOWER.encode(block.get_hash())
            );
            let branch = std::iter::once(Ok(block.clone()))
                .chain(self.iterator_from(block.get_pre_block_hash()));
            let utxo = Self::collect_utxo(branch)?;
            let stale_keys = UTXOSet::index_keys(&self.db)?;
            Some((stale_keys, UTXOSet::encode_entries(&utxo)?))
        } else {
            None
        };

        let block_data = block.serialize()?;
        self.db
            .transaction(|tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                if becomes_tip {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                    match &rebuilt_index {
                        Some((stale_keys, entries)) => {
                            UTXOSet::rewrite(tx_db, stale_keys, entries)?
                        }
                        None => UTXOSet::apply_block(tx_db, block)?,
                    }
                }
                Ok(())
            })?;

        if becomes_tip {
            self.set_tip_hash(block.get_hash());
        }
        Ok(becomes_tip)
    }

    /// Walks from the current tip back to genesis
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    /// Walks from `block_hash` back to genesis
    pub fn iterator_from(&self, block_hash: &[u8]) -> BlockchainIterator {
        BlockchainIterator::new(block_hash.to_vec(), self.db.clone())
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Block> {
        let block_bytes = self.db.get(block_hash)?.ok_or_else(|| {
            BlockchainError::NotFound(format!("Block {}", HEXLOWER.encode(block_hash)))
        })?;
        Block::deserialize(block_bytes.as_ref())
    }

    pub fn get_best_height(&self) -> Result<usize> {
        Ok(self.get_block(&self.get_tip_hash())?.get_height())
    }

    /// Hashes of the main chain, tip first
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()
            .map(|block| block.map(|block| block.get_hash().to_vec()))
            .collect()
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        self.find_transaction_from(txid, &self.get_tip_hash())
    }

    /// Looks for `txid` in the branch ending at `block_hash`
    pub fn find_transaction_from(&self, txid: &[u8], block_hash: &[u8]) -> Result<Transaction> {
        for block in self.iterator_from(block_hash) {
            let block = block?;
            if let Some(transaction) = block
                .get_transactions()
                .iter()
                .find(|transaction| transaction.get_id() == txid)
            {
                return Ok(transaction.clone());
            }
        }
        Err(BlockchainError::NotFound(format!(
            "Transaction {}",
            HEXLOWER.encode(txid)
        )))
    }

    fn prev_transactions(&self, tx: &Transaction, block_hash: &[u8]) -> Result<PrevTransactions> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if prev_txs.contains_key(&txid_hex) {
                continue;
            }
            let prev_tx = self.find_transaction_from(vin.get_txid(), block_hash)?;
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction<S: Signer + ?Sized>(
        &self,
        tx: &mut Transaction,
        signer: &S,
    ) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.prev_transactions(tx, &self.get_tip_hash())?;
        tx.sign(signer, &prev_txs)
    }

    /// Checks every signature and that the inputs carry exactly the value the
    /// outputs pay out
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        self.verify_transaction_from(tx, &self.get_tip_hash())
    }

    fn verify_transaction_from(&self, tx: &Transaction, block_hash: &[u8]) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions(tx, block_hash)?;
        if !tx.verify(&prev_txs) {
            return Ok(false);
        }
        match (tx.input_value(&prev_txs), tx.output_value()) {
            (Some(inputs), Some(outputs)) => Ok(inputs == outputs),
            _ => Ok(false),
        }
    }

    /// Unspent outputs of the main chain, computed by walking every block
    pub fn find_utxo(&self) -> Result<UtxoMap> {
        Self::collect_utxo(self.iterator())
    }

    // Blocks arrive newest first, so an output's spenders are always seen
    // before the output itself
    fn collect_utxo<I>(blocks: I) -> Result<UtxoMap>
    where
        I: Iterator<Item = Result<Block>>,
    {
        let mut utxo: UtxoMap = HashMap::new();
        let mut spent_txos: HashSet<(Vec<u8>, usize)> = HashSet::new();

        for block in blocks {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let unspent: Vec<UnspentOutput> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !spent_txos.contains(&(tx.get_id().to_vec(), *idx)))
                    .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(tx.get_id().to_vec(), unspent);
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(idx) = txin.output_position() {
                        spent_txos.insert((txin.get_txid().to_vec(), idx));
                    }
                }
            }
        }
        Ok(utxo)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn check_difficulty(difficulty: u32) -> Result<()> {
    if difficulty == 0 || difficulty > MAX_DIFFICULTY {
        return Err(BlockchainError::Config(format!(
            "Difficulty must be between 1 and {MAX_DIFFICULTY}, got {difficulty}"
        )));
    }
    Ok(())
}

/// Lazy walk from a block back to genesis over `pre_block_hash` links.
/// Stops after the first error.
pub struct BlockchainIterator {
    db: Db,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            db,
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        let hash = std::mem::take(&mut self.current_hash);

        let block = match self.db.get(&hash) {
            Ok(Some(data)) => Block::deserialize(data.as_ref()),
            Ok(None) => Err(BlockchainError::NotFound(format!(
                "Block {}",
                HEXLOWER.encode(&hash)
            ))),
            Err(e) => Err(e.into()),
        };
        if let Ok(block) = &block {
            self.current_hash = block.get_pre_block_hash().to_vec();
        }
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{create_test_blockchain, create_test_wallets, spend, TEST_DIFFICULTY};
    use crate::wallet::{hash_pub_key, Wallet};
    use tempfile::tempdir;

    #[test]
    fn test_genesis_is_tip() {
        let (blockchain, wallet, _dir) = create_test_blockchain().unwrap();

        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        assert!(genesis.is_genesis());

        let coinbase = &genesis.get_transactions()[0];
        assert_eq!(
            coinbase.get_vin()[0].get_signature(),
            GENESIS_COINBASE_DATA.as_bytes()
        );
        assert!(coinbase.get_vout()[0].is_locked_with_key(&hash_pub_key(wallet.get_public_key())));
    }

    #[test]
    fn test_create_twice_fails_and_open_missing_fails() {
        let (blockchain, wallet, dir) = create_test_blockchain().unwrap();
        let path = blockchain.get_db_path().to_path_buf();
        drop(blockchain);

        assert!(matches!(
            Blockchain::create_blockchain(&wallet.get_address(), &path, TEST_DIFFICULTY),
            Err(BlockchainError::AlreadyExists(_))
        ));
        assert!(matches!(
            Blockchain::open_blockchain(dir.path().join("missing"), TEST_DIFFICULTY),
            Err(BlockchainError::NotFound(_))
        ));
    }

    #[test]
    fn test_difficulty_bounds() {
        let dir = tempdir().unwrap();
        let address = Wallet::new().unwrap().get_address();
        assert!(matches!(
            Blockchain::create_blockchain(&address, dir.path().join("a"), 0),
            Err(BlockchainError::Config(_))
        ));
        assert!(matches!(
            Blockchain::create_blockchain(&address, dir.path().join("b"), MAX_DIFFICULTY + 1),
            Err(BlockchainError::Config(_))
        ));
    }

    #[test]
    fn test_iterator_ends_at_genesis() {
        let (blockchain, wallet, _dir) = create_test_blockchain().unwrap();
        for _ in 0..2 {
            let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), None).unwrap();
            blockchain.mine_block(&[coinbase]).unwrap();
        }

        let blocks: Vec<Block> = blockchain.iterator().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].get_height(), 2);
        assert!(blocks[2].is_genesis());
        assert_eq!(
            blockchain.get_block_hashes().unwrap(),
            blocks.iter().map(|b| b.get_hash().to_vec()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_iterator_reports_missing_block_once() {
        let (blockchain, _wallet, _dir) = create_test_blockchain().unwrap();
        let mut iterator = blockchain.iterator_from(&[7u8; 32]);
        assert!(matches!(
            iterator.next(),
            Some(Err(BlockchainError::NotFound(_)))
        ));
        assert!(iterator.next().is_none());
    }

    #[test]
    fn test_find_transaction() {
        let (blockchain, _wallet, _dir) = create_test_blockchain().unwrap();
        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        let coinbase = &genesis.get_transactions()[0];

        assert_eq!(
            &blockchain.find_transaction(coinbase.get_id()).unwrap(),
            coinbase
        );
        assert!(matches!(
            blockchain.find_transaction(&[0u8; 32]),
            Err(BlockchainError::NotFound(_))
        ));
    }

    #[test]
    fn test_double_spend_within_block_is_rejected() {
        let (blockchain, alice, _dir) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();
        let carol = Wallet::new().unwrap();

        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        let source = &genesis.get_transactions()[0];
        let to_bob = spend(&blockchain, &alice, source, 0, &bob.get_address());
        let to_carol = spend(&blockchain, &alice, source, 0, &carol.get_address());

        assert!(matches!(
            blockchain.mine_block(&[to_bob, to_carol]),
            Err(BlockchainError::DoubleSpend(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
    }

    #[test]
    fn test_spent_output_cannot_be_spent_again() {
        let (blockchain, alice, _dir) = create_test_blockchain().unwrap();
        let bob = Wallet::new().unwrap();

        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        let source = genesis.get_transactions()[0].clone();
        let first = spend(&blockchain, &alice, &source, 0, &bob.get_address());
        blockchain.mine_block(&[first]).unwrap();

        let again = spend(&blockchain, &alice, &source, 0, &bob.get_address());
        assert!(matches!(
            blockchain.mine_block(&[again]),
            Err(BlockchainError::DoubleSpend(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 1);
    }

    #[test]
    fn test_output_cannot_be_spent_with_another_key() {
        let (blockchain, alice, _dir) = create_test_blockchain().unwrap();
        let (wallets, addresses, _wallet_dir) = create_test_wallets(1).unwrap();
        let mallory = wallets.get_wallet(&addresses[0]).unwrap();

        // Mallory signs properly, but with her own key on alice's output
        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        let source = &genesis.get_transactions()[0];
        let theft = spend(&blockchain, mallory, source, 0, &addresses[0]);

        assert!(!blockchain.verify_transaction(&theft).unwrap());
        assert!(matches!(
            blockchain.mine_block(&[theft.clone()]),
            Err(BlockchainError::VerificationFailed(_))
        ));

        let coinbase = Transaction::new_coinbase_tx(&addresses[0], None).unwrap();
        let block = Block::new_block(
            &blockchain.get_tip_hash(),
            &[coinbase, theft],
            1,
            TEST_DIFFICULTY,
        )
        .unwrap();
        assert!(matches!(
            blockchain.accept_block(&block),
            Err(BlockchainError::VerificationFailed(_))
        ));

        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        let utxo_set = UTXOSet::new(blockchain.clone());
        assert_eq!(
            utxo_set
                .get_balance(&hash_pub_key(alice.get_public_key()))
                .unwrap(),
            SUBSIDY
        );
        assert_eq!(
            utxo_set
                .get_balance(&hash_pub_key(mallory.get_public_key()))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_replayed_transaction_is_rejected() {
        let (blockchain, alice, _dir) = create_test_blockchain().unwrap();
        let (_wallets, addresses, _wallet_dir) = create_test_wallets(1).unwrap();

        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        let genesis_tx = genesis.get_transactions()[0].clone();
        let to_bob = spend(&blockchain, &alice, &genesis_tx, 0, &addresses[0]);
        blockchain.mine_block(&[to_bob.clone()]).unwrap();

        // The genesis coinbase again would re-index its spent output
        assert!(matches!(
            blockchain.mine_block(&[genesis_tx.clone()]),
            Err(BlockchainError::InvalidBlock(_))
        ));
        let replay = Block::new_block(
            &blockchain.get_tip_hash(),
            &[genesis_tx.clone()],
            2,
            TEST_DIFFICULTY,
        )
        .unwrap();
        assert!(matches!(
            blockchain.accept_block(&replay),
            Err(BlockchainError::InvalidBlock(_))
        ));

        let utxo_set = UTXOSet::new(blockchain.clone());
        assert!(!utxo_set.is_unspent(genesis_tx.get_id(), 0).unwrap());
        assert!(utxo_set.is_unspent(to_bob.get_id(), 0).unwrap());
        assert_eq!(blockchain.get_best_height().unwrap(), 1);

        // A side branch off genesis holds the same id
        let side =
            Block::new_block(genesis.get_hash(), &[genesis_tx], 1, TEST_DIFFICULTY).unwrap();
        assert!(matches!(
            blockchain.accept_block(&side),
            Err(BlockchainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_unsigned_transaction_is_rejected() {
        let (blockchain, alice, _dir) = create_test_blockchain().unwrap();
        let mallory = Wallet::new().unwrap();

        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        let source = &genesis.get_transactions()[0];
        let mut tx = spend(&blockchain, &alice, source, 0, &mallory.get_address());
        tx.get_vin_mut()[0].set_signature(vec![1u8; 64]);

        assert!(!blockchain.verify_transaction(&tx).unwrap());
        assert!(matches!(
            blockchain.mine_block(&[tx]),
            Err(BlockchainError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_coinbase_rules() {
        let (blockchain, wallet, _dir) = create_test_blockchain().unwrap();
        let address = wallet.get_address();
        let first = Transaction::new_coinbase_tx(&address, None).unwrap();
        let second = Transaction::new_coinbase_tx(&address, None).unwrap();

        assert!(matches!(
            blockchain.mine_block(&[first, second]),
            Err(BlockchainError::InvalidBlock(_))
        ));
        assert!(matches!(
            blockchain.mine_block(&[]),
            Err(BlockchainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_accept_block_rules() {
        let (blockchain, wallet, _dir) = create_test_blockchain().unwrap();
        let address = wallet.get_address();
        let tip = blockchain.get_tip_hash();

        // Wrong difficulty
        let coinbase = Transaction::new_coinbase_tx(&address, None).unwrap();
        let easy = Block::new_block(&tip, &[coinbase], 1, TEST_DIFFICULTY - 1).unwrap();
        assert!(matches!(
            blockchain.accept_block(&easy),
            Err(BlockchainError::InvalidBlock(_))
        ));

        // Unknown parent
        let coinbase = Transaction::new_coinbase_tx(&address, None).unwrap();
        let orphan = Block::new_block(&[9u8; 32], &[coinbase], 1, TEST_DIFFICULTY).unwrap();
        assert!(matches!(
            blockchain.accept_block(&orphan),
            Err(BlockchainError::InvalidBlock(_))
        ));

        // Height gap
        let coinbase = Transaction::new_coinbase_tx(&address, None).unwrap();
        let skipping = Block::new_block(&tip, &[coinbase], 5, TEST_DIFFICULTY).unwrap();
        assert!(matches!(
            blockchain.accept_block(&skipping),
            Err(BlockchainError::InvalidBlock(_))
        ));

        // Tampered nonce
        let coinbase = Transaction::new_coinbase_tx(&address, None).unwrap();
        let good = Block::new_block(&tip, &[coinbase], 1, TEST_DIFFICULTY).unwrap();
        let mut nonce = good.get_nonce() + 1;
        let tampered = loop {
            let candidate = good.with_nonce(nonce);
            if !ProofOfWork::validate(&candidate) {
                break candidate;
            }
            nonce += 1;
        };
        assert!(matches!(
            blockchain.accept_block(&tampered),
            Err(BlockchainError::InvalidBlock(_))
        ));

        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert!(blockchain.accept_block(&good).unwrap());
        assert_eq!(blockchain.get_best_height().unwrap(), 1);
        // Idempotent
        assert!(!blockchain.accept_block(&good).unwrap());
    }

    #[test]
    fn test_cancelled_mining_leaves_store_untouched() {
        let (blockchain, wallet, _dir) = create_test_blockchain().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), None).unwrap();
        let cancel = AtomicBool::new(true);

        assert!(matches!(
            blockchain.mine_block_with_cancel(&[coinbase], &cancel),
            Err(BlockchainError::MiningCancelled)
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert_eq!(blockchain.get_block_hashes().unwrap().len(), 1);
    }
}
