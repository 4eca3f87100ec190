use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

/// Length of a locking hash, RIPEMD160(SHA256(public key))
pub const PUB_KEY_HASH_LEN: usize = 20;

/// Whatever holds a private key and can authorize spends.
///
/// The ledger only needs the raw public key (64 bytes, `x ‖ y`) and a way to
/// produce an `r ‖ s` ECDSA P-256 signature over a message.
pub trait Signer {
    fn public_key(&self) -> &[u8];

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = crate::utils::new_key_pair()?;
        let public_key = crate::utils::public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        convert_address(hash_pub_key(self.public_key.as_slice()).as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

impl Signer for Wallet {
    fn public_key(&self) -> &[u8] {
        self.get_public_key()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        crate::utils::ecdsa_p256_sha256_sign_digest(&self.pkcs8, message)
    }
}

// Keeps the private key out of logs
impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.get_address())
            .finish_non_exhaustive()
    }
}

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = crate::utils::sha256_digest(pub_key);
    crate::utils::ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = crate::utils::sha256_digest(payload);
    let second_sha = crate::utils::sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    address_to_pub_key_hash(address).is_ok()
}

/// Decodes a Base58Check address back to the locking hash it encodes
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    let payload = crate::utils::base58_decode(address)?;
    if payload.len() != 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECK_SUM_LEN {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: unexpected payload length {}",
            payload.len()
        )));
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    if body[0] != VERSION {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: unknown version byte {}",
            body[0]
        )));
    }
    if checksum(body) != actual_checksum {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: checksum mismatch"
        )));
    }
    Ok(body[1..].to_vec())
}

pub fn convert_address(pub_hash_key: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![];
    payload.push(VERSION);
    payload.extend(pub_hash_key);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    // version + pub_key_hash + checksum
    crate::utils::base58_encode(payload.as_slice())
}
