//! # Payroll Merkle Commitments
//!
//! A payroll batch commits to its `(wallet, amount)` list with a binary
//! merkle root, so a thaw can be authorized per employee without putting
//! the whole list on-chain.
//!
//! - leaf: `SHA-256(0x00 || wallet || amount_le)`
//! - node: `SHA-256(0x01 || min(a, b) || max(a, b))`
//!
//! Pairs are sorted before hashing, so a proof is just the list of sibling
//! hashes with no left/right flags. The domain bytes keep a leaf from ever
//! being mistaken for an internal node. An odd node at the end of a level
//! is paired with itself. The empty tree has an all-zero root.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::{TreasuryError, TreasuryResult};

const LEAF_DOMAIN: u8 = 0x00;
const NODE_DOMAIN: u8 = 0x01;

pub type Hash32 = [u8; 32];

/// One employee's allotment in a payroll batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollLeaf {
    pub wallet: Address,
    /// Pegged atomic units.
    pub amount: u64,
}

impl PayrollLeaf {
    pub fn new(wallet: Address, amount: u64) -> Self {
        Self { wallet, amount }
    }

    pub fn hash(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update([LEAF_DOMAIN]);
        hasher.update(self.wallet.as_bytes());
        hasher.update(self.amount.to_le_bytes());
        hasher.finalize().into()
    }
}

fn hash_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update([NODE_DOMAIN]);
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

fn next_level(level: &[Hash32]) -> Vec<Hash32> {
    level
        .chunks(2)
        .filter_map(|pair| {
            let left = pair.first()?;
            let right = pair.get(1).unwrap_or(left);
            Some(hash_pair(left, right))
        })
        .collect()
}

/// A fully materialized tree: every level, leaves first.
#[derive(Clone, Debug)]
pub struct PayrollMerkleTree {
    levels: Vec<Vec<Hash32>>,
}

impl PayrollMerkleTree {
    pub fn build(leaves: &[PayrollLeaf]) -> Self {
        let mut levels = vec![leaves.iter().map(PayrollLeaf::hash).collect::<Vec<_>>()];
        while levels.last().map_or(0, Vec::len) > 1 {
            let next = levels.last().map(|l| next_level(l)).unwrap_or_default();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> Hash32 {
        match self.levels.last() {
            Some(top) if top.len() == 1 => top[0],
            _ => [0u8; 32],
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Sibling hashes from the leaf at `index` up to the root.
    pub fn proof(&self, index: usize) -> TreasuryResult<Vec<Hash32>> {
        if index >= self.leaf_count() {
            return Err(TreasuryError::InvalidMerkleProof(format!(
                "leaf {index} out of range ({} leaves)",
                self.leaf_count()
            )));
        }
        let mut proof = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            proof.push(*level.get(sibling).unwrap_or(&level[position]));
            position /= 2;
        }
        Ok(proof)
    }
}

/// Root of `leaves` without keeping the tree.
pub fn payroll_root(leaves: &[PayrollLeaf]) -> Hash32 {
    PayrollMerkleTree::build(leaves).root()
}

/// Recomputes the path from `leaf` through `proof` and compares to `root`.
pub fn verify_proof(leaf: &PayrollLeaf, proof: &[Hash32], root: &Hash32) -> bool {
    let computed = proof.iter().fold(leaf.hash(), |acc, sibling| hash_pair(&acc, sibling));
    &computed == root
}

/// Hex rendering used in logs and CLI output.
pub fn root_to_hex(root: &Hash32) -> String {
    hex::encode(root)
}

pub fn root_from_hex(s: &str) -> TreasuryResult<Hash32> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| TreasuryError::InvalidMerkleProof(format!("root is not hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| TreasuryError::InvalidMerkleProof("root must be 32 bytes".into()))
}
