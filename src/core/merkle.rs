use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;

/// Binary hash tree over a block's transactions
///
/// Leaves are the SHA-256 of each serialized transaction. Levels with an odd
/// number of nodes pair the last node with itself.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: MerkleNode,
    leaf_count: usize,
}

#[derive(Debug, Clone)]
struct MerkleNode {
    hash: Vec<u8>,
    left: Option<Box<MerkleNode>>,
    right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(hash: Vec<u8>) -> MerkleNode {
        MerkleNode {
            hash,
            left: None,
            right: None,
        }
    }

    fn parent(left: MerkleNode, right: MerkleNode) -> MerkleNode {
        MerkleNode {
            hash: MerkleTree::hash_pair(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    fn depth(&self) -> usize {
        match &self.left {
            Some(left) => 1 + left.depth(),
            None => 0,
        }
    }
}

impl MerkleTree {
    /// Builds the tree for `transactions`. An empty set is rejected: every
    /// block carries at least its coinbase.
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let leaf_hashes = transactions
            .iter()
            .map(|tx| Ok(sha256_digest(&tx.serialize()?)))
            .collect::<Result<Vec<Vec<u8>>>>()?;
        Self::from_hashes(&leaf_hashes)
    }

    /// Builds the tree directly from leaf hashes
    pub fn from_hashes(leaf_hashes: &[Vec<u8>]) -> Result<Self> {
        if leaf_hashes.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let mut current_level: Vec<MerkleNode> = leaf_hashes
            .iter()
            .map(|hash| MerkleNode::leaf(hash.clone()))
            .collect();

        while current_level.len() > 1 {
            let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));
            let mut nodes = current_level.into_iter();
            while let Some(left) = nodes.next() {
                let right = match nodes.next() {
                    Some(right) => right,
                    // Odd level: the last node pairs with a copy of itself
                    None => left.clone(),
                };
                next_level.push(MerkleNode::parent(left, right));
            }
            current_level = next_level;
        }

        let root = current_level
            .pop()
            .ok_or_else(|| BlockchainError::InvalidBlock("Failed to build Merkle tree".to_string()))?;

        Ok(MerkleTree {
            root,
            leaf_count: leaf_hashes.len(),
        })
    }

    pub fn get_root_hash(&self) -> &[u8] {
        self.root.hash.as_slice()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of hashing levels above the leaves
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}

/// Merkle root of `transactions`, in order
pub fn merkle_root(transactions: &[Transaction]) -> Result<Vec<u8>> {
    Ok(MerkleTree::new(transactions)?.get_root_hash().to_vec())
}
