use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};

/// Width of one P-256 coordinate or signature scalar
const SCALAR_LEN: usize = 32;

/// SEC1 tag for an uncompressed point
const UNCOMPRESSED_TAG: u8 = 0x04;

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// Raw `x ‖ y` coordinates of the key pair held in `pkcs8`
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    use ring::signature::KeyPair;

    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    // ring hands out the SEC1 uncompressed form, drop the tag byte
    Ok(key_pair.public_key().as_ref()[1..].to_vec())
}

/// Signs `message` with ECDSA P-256 over SHA-256, returning `r ‖ s`
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Checks an `r ‖ s` signature against a 64-byte `x ‖ y` public key.
///
/// The signature is split in half; each half may be shorter than 32 bytes
/// and is left-padded before verification.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    if public_key.len() != 2 * SCALAR_LEN {
        return false;
    }
    let signature = match fixed_width_signature(signature) {
        Some(signature) => signature,
        None => return false,
    };

    let mut uncompressed = Vec::with_capacity(1 + public_key.len());
    uncompressed.push(UNCOMPRESSED_TAG);
    uncompressed.extend_from_slice(public_key);

    let peer_public_key =
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, uncompressed);
    peer_public_key.verify(message, signature.as_ref()).is_ok()
}

fn fixed_width_signature(signature: &[u8]) -> Option<[u8; 2 * SCALAR_LEN]> {
    if signature.is_empty() || signature.len() % 2 != 0 || signature.len() > 2 * SCALAR_LEN {
        return None;
    }
    let (r, s) = signature.split_at(signature.len() / 2);
    let mut fixed = [0u8; 2 * SCALAR_LEN];
    fixed[SCALAR_LEN - r.len()..SCALAR_LEN].copy_from_slice(r);
    fixed[2 * SCALAR_LEN - s.len()..].copy_from_slice(s);
    Some(fixed)
}
