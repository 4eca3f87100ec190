//! Test utilities for ledger testing

use crate::core::{Block, Blockchain, ProofOfWork, TXInput, TXOutput, Transaction};
use crate::error::Result;
use crate::storage::UTXOSet;
use crate::wallet::{hash_pub_key, Wallet, Wallets};
use tempfile::TempDir;

/// Low enough to mine in milliseconds, high enough that a random nonce usually fails
pub const TEST_DIFFICULTY: u32 = 8;

/// A fresh chain whose genesis reward belongs to the returned wallet
pub fn create_test_blockchain() -> Result<(Blockchain, Wallet, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let wallet = Wallet::new()?;
    let blockchain = Blockchain::create_blockchain(
        &wallet.get_address(),
        temp_dir.path().join("blocks"),
        TEST_DIFFICULTY,
    )?;
    Ok((blockchain, wallet, temp_dir))
}

/// A wallet file in its own temporary directory holding `count` wallets
pub fn create_test_wallets(count: usize) -> Result<(Wallets, Vec<String>, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let mut wallets = Wallets::load(temp_dir.path().join("wallets.data"))?;
    let addresses = (0..count)
        .map(|_| wallets.create_wallet())
        .collect::<Result<Vec<_>>>()?;
    Ok((wallets, addresses, temp_dir))
}

/// Signed transaction moving the whole of `source`'s output `vout` to `to`
pub fn spend(
    blockchain: &Blockchain,
    owner: &Wallet,
    source: &Transaction,
    vout: usize,
    to: &str,
) -> Transaction {
    let value = source.get_vout()[vout].get_value();
    let mut input = TXInput::new(source.get_id(), vout as i64);
    input.set_pub_key(owner.get_public_key().to_vec());

    let mut tx = Transaction::new(vec![input], vec![TXOutput::new(value, to).unwrap()]).unwrap();
    blockchain.sign_transaction(&mut tx, owner).unwrap();
    tx
}

/// Checks linkage, heights and proof of work from the tip down, and that the
/// UTXO index matches a full rescan of the chain
pub fn validate_blockchain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let blocks = blockchain.iterator().collect::<Result<Vec<Block>>>()?;
    let best_height = blockchain.get_best_height()?;
    if blocks.len() != best_height + 1 {
        return Ok(false);
    }

    for pair in blocks.windows(2) {
        let (child, parent) = (&pair[0], &pair[1]);
        if child.get_pre_block_hash() != parent.get_hash()
            || child.get_height() != parent.get_height() + 1
        {
            return Ok(false);
        }
    }
    if !blocks.iter().all(ProofOfWork::validate_integrity) {
        return Ok(false);
    }
    if !blocks.last().is_some_and(Block::is_genesis) {
        return Ok(false);
    }

    let indexed = UTXOSet::new(blockchain.clone()).entries()?;
    let rescanned = blockchain.find_utxo()?;
    Ok(indexed.len() == rescanned.len()
        && rescanned
            .iter()
            .all(|(txid, outs)| indexed.get(txid) == Some(outs)))
}

/// Sum of the unspent outputs owned by `wallet`
pub fn balance_of(blockchain: &Blockchain, wallet: &Wallet) -> u64 {
    UTXOSet::new(blockchain.clone())
        .get_balance(&hash_pub_key(wallet.get_public_key()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SUBSIDY;

    #[test]
    fn test_create_test_blockchain() {
        let (blockchain, wallet, _temp_dir) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert_eq!(balance_of(&blockchain, &wallet), SUBSIDY);
    }

    #[test]
    fn test_create_test_wallets() {
        let (wallets, addresses, _temp_dir) = create_test_wallets(5).unwrap();
        assert_eq!(addresses.len(), 5);

        let mut unique = addresses.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        assert!(addresses.iter().all(|a| wallets.get_wallet(a).is_some()));
    }

    #[test]
    fn test_validate_blockchain_integrity() {
        let (blockchain, wallet, _temp_dir) = create_test_blockchain().unwrap();
        assert!(validate_blockchain_integrity(&blockchain).unwrap());

        let bob = Wallet::new().unwrap();
        let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap();
        let tx = spend(
            &blockchain,
            &wallet,
            &genesis.get_transactions()[0],
            0,
            &bob.get_address(),
        );
        blockchain.mine_block(&[tx]).unwrap();
        assert!(validate_blockchain_integrity(&blockchain).unwrap());
        assert_eq!(balance_of(&blockchain, &bob), SUBSIDY);
        assert_eq!(balance_of(&blockchain, &wallet), 0);
    }
}
