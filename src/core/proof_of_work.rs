use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use num_bigint::{BigInt, Sign};
use std::borrow::Borrow;
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct ProofOfWork {
    pre_block_hash: Vec<u8>,
    merkle_root: Vec<u8>,
    target: BigInt,
    difficulty: u32,
}

const MAX_NONCE: i64 = i64::MAX;

// How often the nonce search reports progress
const PROGRESS_INTERVAL: i64 = 1 << 20;

impl ProofOfWork {
    pub fn new_proof_of_work(
        pre_block_hash: &[u8],
        merkle_root: &[u8],
        difficulty: u32,
    ) -> ProofOfWork {
        ProofOfWork {
            pre_block_hash: pre_block_hash.to_vec(),
            merkle_root: merkle_root.to_vec(),
            target: Self::target_for(difficulty),
            difficulty,
        }
    }

    /// `2^(256 - difficulty)`
    pub fn target_for(difficulty: u32) -> BigInt {
        let mut target = BigInt::from(1);
        target.shl_assign(256u32.saturating_sub(difficulty));
        target
    }

    /// Recomputes the block's hash from its nonce and checks it against the
    /// target of its recorded difficulty. The stored hash is never consulted.
    pub fn validate(block: &Block) -> bool {
        match Self::recompute(block) {
            Some((pow, hash)) => pow.meets_target(&hash),
            None => false,
        }
    }

    /// [`validate`](Self::validate), and the recomputed hash must also equal
    /// the hash recorded in the block.
    pub fn validate_integrity(block: &Block) -> bool {
        match Self::recompute(block) {
            Some((pow, hash)) => pow.meets_target(&hash) && hash.as_slice() == block.get_hash(),
            None => false,
        }
    }

    fn recompute(block: &Block) -> Option<(ProofOfWork, Vec<u8>)> {
        let merkle_root = match block.merkle_root() {
            Ok(root) => root,
            Err(e) => {
                log::warn!("Cannot recompute proof of work: {e}");
                return None;
            }
        };
        let pow = ProofOfWork::new_proof_of_work(
            block.get_pre_block_hash(),
            &merkle_root,
            block.get_difficulty(),
        );
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        Some((pow, hash))
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash);
        hash_int.lt(self.target.borrow())
    }

    // prev hash ‖ merkle root ‖ nonce ‖ difficulty, integers as 8-byte big-endian
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes =
            Vec::with_capacity(self.pre_block_hash.len() + self.merkle_root.len() + 16);
        data_bytes.extend(self.pre_block_hash.as_slice());
        data_bytes.extend(self.merkle_root.as_slice());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes.extend(i64::from(self.difficulty).to_be_bytes());
        data_bytes
    }

    /// Searches nonces from zero upward until the hash falls below the target
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        self.run_with_cancel(&AtomicBool::new(false))
    }

    /// Like [`run`](Self::run), but gives up with `MiningCancelled` as soon as
    /// `cancel` is raised.
    pub fn run_with_cancel(&self, cancel: &AtomicBool) -> Result<(i64, Vec<u8>)> {
        log::debug!("Mining at difficulty {}", self.difficulty);
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            if cancel.load(Ordering::Relaxed) {
                log::debug!("Mining cancelled after {nonce} attempts");
                return Err(BlockchainError::MiningCancelled);
            }

            let data = self.prepare_data(nonce);
            let hash = sha256_digest(data.as_slice());
            if self.meets_target(&hash) {
                log::debug!("Found nonce {nonce}: {}", HEXLOWER.encode(hash.as_slice()));
                return Ok((nonce, hash));
            }

            nonce += 1;
            if nonce % PROGRESS_INTERVAL == 0 {
                log::debug!("Still mining, {nonce} nonces tried");
            }
        }
        Err(BlockchainError::Mining(format!(
            "Nonce space exhausted at difficulty {}",
            self.difficulty
        )))
    }
}
