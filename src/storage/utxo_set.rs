use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::Db;
use std::collections::{BTreeMap, HashMap};

/// Key prefix separating index entries from block records
pub const UTXO_PREFIX: &[u8] = b"utxo-";

/// Unspent outputs keyed by raw transaction id
pub type UtxoMap = HashMap<Vec<u8>, Vec<UnspentOutput>>;

/// One still-unspent output together with its position in the transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UnspentOutput {
    index: usize,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn new(index: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput { index, output }
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// Persisted index of unspent outputs, derived from the chain it wraps
pub struct UTXOSet {
    blockchain: Blockchain,
}

fn utxo_key(txid: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO_PREFIX.len() + txid.len());
    key.extend_from_slice(UTXO_PREFIX);
    key.extend_from_slice(txid);
    key
}

fn abort<T>(err: BlockchainError) -> ConflictableTransactionResult<T, BlockchainError> {
    Err(ConflictableTransactionError::Abort(err))
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    // Index entries in key order. Records that fail to decode are logged and skipped.
    fn scan(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<UnspentOutput>)>> + '_ {
        self.blockchain
            .get_db()
            .scan_prefix(UTXO_PREFIX)
            .filter_map(|item| {
                let (key, value) = match item {
                    Ok(kv) => kv,
                    Err(e) => return Some(Err(e.into())),
                };
                let txid = key[UTXO_PREFIX.len()..].to_vec();
                match deserialize::<Vec<UnspentOutput>>(value.as_ref()) {
                    Ok(outs) => Some(Ok((txid, outs))),
                    Err(e) => {
                        warn!("Skipping corrupt UTXO entry {}: {e}", HEXLOWER.encode(&txid));
                        None
                    }
                }
            })
    }

    /// Collects outputs locked to `pub_key_hash` until they cover `amount`.
    ///
    /// Returns the accumulated value and the chosen output indices keyed by
    /// hex transaction id. An accumulated value below `amount` means the
    /// owner cannot afford it.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let mut unspent_outputs: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut accumulated = 0u64;

        'scan: for entry in self.scan() {
            let (txid, outs) = entry?;
            for out in outs {
                if accumulated >= amount {
                    break 'scan;
                }
                if out.output.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(out.output.get_value());
                    unspent_outputs
                        .entry(HEXLOWER.encode(&txid))
                        .or_default()
                        .push(out.index);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// Every unspent output locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for entry in self.scan() {
            let (_, outs) = entry?;
            utxos.extend(
                outs.into_iter()
                    .filter(|out| out.output.is_locked_with_key(pub_key_hash))
                    .map(|out| out.output),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .fold(0u64, |total, out| total.saturating_add(out.get_value())))
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<usize> {
        let mut counter = 0;
        for entry in self.scan() {
            entry?;
            counter += 1;
        }
        Ok(counter)
    }

    pub fn is_unspent(&self, txid: &[u8], index: usize) -> Result<bool> {
        match self.blockchain.get_db().get(utxo_key(txid))? {
            Some(bytes) => {
                let outs: Vec<UnspentOutput> = deserialize(bytes.as_ref())?;
                Ok(outs.iter().any(|out| out.index == index))
            }
            None => Ok(false),
        }
    }

    /// Whole index, decodable entries only
    pub fn entries(&self) -> Result<BTreeMap<Vec<u8>, Vec<UnspentOutput>>> {
        self.scan().collect()
    }

    /// Drops every entry and rebuilds the index from the main chain in a
    /// single store transaction
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.blockchain.lock_writer();

        let utxo = self.blockchain.find_utxo()?;
        let entries = Self::encode_entries(&utxo)?;
        let db = self.blockchain.get_db();
        let stale_keys = Self::index_keys(db)?;

        db.transaction(|tx_db| Self::rewrite(tx_db, &stale_keys, &entries))?;
        info!(
            "Reindexed UTXO set: {} transactions with unspent outputs",
            entries.len()
        );
        Ok(())
    }

    /// Applies one block's spends and new outputs to the index.
    ///
    /// Mining and accepting blocks already do this as part of storing them;
    /// call it only for blocks that reached the chain some other way.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.blockchain.lock_writer();
        self.blockchain
            .get_db()
            .transaction(|tx_db| Self::apply_block(tx_db, block))?;
        Ok(())
    }

    /// Index delta for `block`, inside an open store transaction. Spending an
    /// output the index does not hold aborts the transaction with `DoubleSpend`.
    pub(crate) fn apply_block(
        tx_db: &TransactionalTree,
        block: &Block,
    ) -> ConflictableTransactionResult<(), BlockchainError> {
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let key = utxo_key(vin.get_txid());
                    let spent = format!("{}:{}", HEXLOWER.encode(vin.get_txid()), vin.get_vout());

                    let outs: Vec<UnspentOutput> = match tx_db.get(&key)? {
                        Some(bytes) => match deserialize(bytes.as_ref()) {
                            Ok(outs) => outs,
                            Err(e) => return abort(e),
                        },
                        None => return abort(BlockchainError::DoubleSpend(spent)),
                    };

                    let before = outs.len();
                    let updated_outs: Vec<UnspentOutput> = outs
                        .into_iter()
                        .filter(|out| Some(out.index) != vin.output_position())
                        .collect();
                    if updated_outs.len() == before {
                        return abort(BlockchainError::DoubleSpend(spent));
                    }

                    if updated_outs.is_empty() {
                        tx_db.remove(key)?;
                    } else {
                        match serialize(&updated_outs) {
                            Ok(bytes) => tx_db.insert(key, bytes)?,
                            Err(e) => return abort(e),
                        };
                    }
                }
            }

            let new_outputs: Vec<UnspentOutput> = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                .collect();
            let key = utxo_key(tx.get_id());
            if tx_db.get(&key)?.is_some() {
                return abort(BlockchainError::DoubleSpend(format!(
                    "outputs of {} are already indexed",
                    HEXLOWER.encode(tx.get_id())
                )));
            }
            match serialize(&new_outputs) {
                Ok(bytes) => tx_db.insert(key, bytes)?,
                Err(e) => return abort(e),
            };
        }
        Ok(())
    }

    /// Replaces the whole index inside an open store transaction
    pub(crate) fn rewrite(
        tx_db: &TransactionalTree,
        stale_keys: &[Vec<u8>],
        entries: &[(Vec<u8>, Vec<u8>)],
    ) -> ConflictableTransactionResult<(), BlockchainError> {
        for key in stale_keys {
            tx_db.remove(key.as_slice())?;
        }
        for (key, value) in entries {
            tx_db.insert(key.as_slice(), value.as_slice())?;
        }
        Ok(())
    }

    /// Keys of every index entry currently stored
    pub(crate) fn index_keys(db: &Db) -> Result<Vec<Vec<u8>>> {
        db.scan_prefix(UTXO_PREFIX)
            .keys()
            .map(|key| Ok(key?.to_vec()))
            .collect()
    }

    /// Store-ready `(key, value)` pairs for `utxo`
    pub(crate) fn encode_entries(utxo: &UtxoMap) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        utxo.iter()
            .map(|(txid, outs)| Ok((utxo_key(txid), serialize(outs)?)))
            .collect()
    }
}
