//! Key management
//!
//! P-256 key pairs, Base58Check addresses and the wallet file. The ledger
//! core only consumes a public key, its hash and a [`Signer`].

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Signer, Wallet,
    ADDRESS_CHECK_SUM_LEN, PUB_KEY_HASH_LEN,
};
pub use wallets::Wallets;
