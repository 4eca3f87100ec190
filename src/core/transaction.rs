// This file implements the transaction model - how value moves through the ledger
// Every transaction consumes earlier outputs and creates new ones (UTXO model)

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{deserialize, ecdsa_p256_sha256_sign_verify, serialize, sha256_digest};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Signer};
use data_encoding::HEXLOWER;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Fixed reward paid by every coinbase transaction
pub const SUBSIDY: u64 = 100;

/// Output index carried by a coinbase input, meaning "no prior output"
pub const COINBASE_VOUT: i64 = -1;

const COINBASE_NOTE_LEN: usize = 24;

/// Prior transactions needed to sign or verify, keyed by hex-encoded id
pub type PrevTransactions = HashMap<String, Transaction>;

// A reference to an earlier output, plus the proof that the spender owns it
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,      // Id of the transaction holding the spent output, copied by value
    vout: i64,          // Index of that output, -1 for coinbase
    signature: Vec<u8>, // r ‖ s, or the free-form note on a coinbase input
    pub_key: Vec<u8>,   // Spender's raw public key (x ‖ y)
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }

    pub fn set_pub_key(&mut self, pub_key: Vec<u8>) {
        self.pub_key = pub_key;
    }

    /// Whether this input was signed by the owner of `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()) == pub_key_hash
    }

    /// Output index as a position, `None` for the coinbase sentinel
    pub fn output_position(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }
}

// Value locked to the hash of a recipient's public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Output paying `value` to a Base58Check `address`
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(TXOutput::locked_to(value, pub_key_hash))
    }

    pub fn locked_to(value: u64, pub_key_hash: Vec<u8>) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash,
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Unsigned transaction over the given inputs and outputs, id computed
    pub fn new(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Coinbase paying the fixed reward to `to`. Without a `note`, fresh random
    /// bytes fill the signature slot so two coinbases never share an id.
    pub fn new_coinbase_tx(to: &str, note: Option<&[u8]>) -> Result<Transaction> {
        let txout = TXOutput::new(SUBSIDY, to)?;
        let note = match note {
            Some(note) => note.to_vec(),
            None => {
                let mut random = vec![0u8; COINBASE_NOTE_LEN];
                rand::thread_rng().fill_bytes(&mut random);
                random
            }
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: note,
            pub_key: vec![],
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![txout],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds and signs a transfer of `amount` from the signer to `to`.
    ///
    /// Unspent outputs of the signer are consumed in the index's own order until
    /// they cover `amount`; any surplus comes back as a change output.
    pub fn new_utxo_transaction<S: Signer + ?Sized>(
        from: &S,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        let recipient = TXOutput::new(amount, to)?;

        let public_key_hash = hash_pub_key(from.public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::CorruptData(format!("Invalid transaction ID {txid_hex}: {e}"))
            })?;
            for out in outs {
                let vout = i64::try_from(out).map_err(|_| {
                    BlockchainError::CorruptData(format!("Output index {out} out of range"))
                })?;
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout,
                    signature: vec![],
                    pub_key: from.public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![recipient];
        if accumulated > amount {
            outputs.push(TXOutput::locked_to(accumulated - amount, public_key_hash));
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        utxo_set.get_blockchain().sign_transaction(&mut tx, from)?;
        Ok(tx)
    }

    /// Copy with every input stripped of signature and public key
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    // The hash signed for input `idx`: the trimmed copy with only that input
    // carrying the locking hash of the output it spends.
    fn input_signing_hash(
        tx_copy: &mut Transaction,
        idx: usize,
        prev_output: &TXOutput,
    ) -> Result<Vec<u8>> {
        tx_copy.vin[idx].signature = vec![];
        tx_copy.vin[idx].pub_key = prev_output.pub_key_hash.clone();
        tx_copy.id = tx_copy.hash()?;
        tx_copy.vin[idx].pub_key = vec![];
        Ok(tx_copy.id.clone())
    }

    fn assert_prev_transactions(&self, prev_txs: &PrevTransactions) {
        for vin in &self.vin {
            assert!(
                prev_txs.contains_key(&HEXLOWER.encode(vin.get_txid())),
                "previous transaction {} missing for input of {}",
                HEXLOWER.encode(vin.get_txid()),
                HEXLOWER.encode(&self.id)
            );
        }
    }

    /// Signs every input. Coinbase transactions are left untouched.
    ///
    /// # Panics
    /// If `prev_txs` lacks a transaction referenced by an input.
    pub fn sign<S: Signer + ?Sized>(
        &mut self,
        signer: &S,
        prev_txs: &PrevTransactions,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.assert_prev_transactions(prev_txs);

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter_mut().enumerate() {
            let prev_tx = &prev_txs[&HEXLOWER.encode(vin.get_txid())];
            let prev_output = vin
                .output_position()
                .and_then(|position| prev_tx.vout.get(position))
                .ok_or_else(|| {
                    BlockchainError::Transaction(format!(
                        "Input {idx} spends missing output {} of {}",
                        vin.vout,
                        HEXLOWER.encode(prev_tx.get_id())
                    ))
                })?;

            let signing_hash = Self::input_signing_hash(&mut tx_copy, idx, prev_output)?;
            vin.signature = signer.sign(&signing_hash)?;
        }
        Ok(())
    }

    /// Checks that every input carries the key its output is locked to, and
    /// that its signature holds under that key.
    ///
    /// # Panics
    /// If `prev_txs` lacks a transaction referenced by an input.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> bool {
        if self.is_coinbase() {
            return true;
        }
        self.assert_prev_transactions(prev_txs);

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_tx = &prev_txs[&HEXLOWER.encode(vin.get_txid())];
            let prev_output = match vin
                .output_position()
                .and_then(|position| prev_tx.vout.get(position))
            {
                Some(output) => output,
                None => {
                    log::warn!("Input {idx} spends an output that does not exist");
                    return false;
                }
            };

            if !vin.uses_key(prev_output.get_pub_key_hash()) {
                log::warn!(
                    "Input {idx} of {} carries a key the spent output is not locked to",
                    HEXLOWER.encode(&self.id)
                );
                return false;
            }

            let signing_hash = match Self::input_signing_hash(&mut tx_copy, idx, prev_output) {
                Ok(hash) => hash,
                Err(e) => {
                    log::warn!("Could not hash input {idx} for verification: {e}");
                    return false;
                }
            };
            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                signing_hash.as_slice(),
            ) {
                return false;
            }
        }
        true
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the serialized transaction with its id cleared
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vin_mut(&mut self) -> &mut [TXInput] {
        self.vin.as_mut_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    /// Sum of all output values, `None` on overflow
    pub fn output_value(&self) -> Option<u64> {
        self.vout
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.value))
    }

    /// Sum of the prior outputs this transaction spends. `None` when an input
    /// points at a missing transaction or output, or on overflow.
    pub fn input_value(&self, prev_txs: &PrevTransactions) -> Option<u64> {
        self.vin.iter().try_fold(0u64, |total, vin| {
            let prev_tx = prev_txs.get(&HEXLOWER.encode(vin.get_txid()))?;
            let output = prev_tx.vout.get(vin.output_position()?)?;
            total.checked_add(output.value)
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", HEXLOWER.encode(&self.id))?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "     Input {i}:")?;
            writeln!(f, "       TXID:      {}", HEXLOWER.encode(&input.txid))?;
            writeln!(f, "       Out:       {}", input.vout)?;
            writeln!(f, "       Signature: {}", HEXLOWER.encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", HEXLOWER.encode(&input.pub_key))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", HEXLOWER.encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}
