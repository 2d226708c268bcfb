//! Binary SHA-256 Merkle tree with one-byte domain separation between leaves
//! and internal nodes.
//!
//! An odd layer pairs its last node with itself, and the proof for that node
//! carries its own hash as a right-hand sibling.

use crate::commit::record::Record;
use crate::commit::CommitError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Digest32 = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn hash_leaf(bytes: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn hash_node(left: &Digest32, right: &Digest32) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Hex-encoded sibling digest.
    pub hash: String,
    pub is_left: bool,
}

/// Everything needed to check one row against a published root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub index: usize,
    #[serde(rename = "row")]
    pub record: Record,
    pub proof: Vec<ProofStep>,
}

/// Immutable once built. `layers[0]` holds the leaf hashes in input order and
/// the last layer holds the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    layers: Vec<Vec<Digest32>>,
}

impl MerkleTree {
    pub fn from_records(records: &[Record]) -> Self {
        Self::from_leaf_hashes(
            records
                .iter()
                .map(|record| hash_leaf(&record.canonical_bytes()))
                .collect(),
        )
    }

    pub fn from_leaf_hashes(leaves: Vec<Digest32>) -> Self {
        if leaves.is_empty() {
            return Self { layers: Vec::new() };
        }

        let mut layers = vec![leaves];
        while let Some(current) = layers.last().filter(|layer| layer.len() > 1) {
            let next: Vec<Digest32> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_node(left, right),
                    [single] => hash_node(single, single),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            layers.push(next);
        }
        Self { layers }
    }

    pub fn leaf_count(&self) -> usize {
        self.layers.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.layers.len().saturating_sub(1)
    }

    /// `None` for an empty tree.
    pub fn root(&self) -> Option<Digest32> {
        self.layers.last().and_then(|top| top.first().copied())
    }

    /// Hex root; the empty tree has the empty root `""`.
    pub fn root_hex(&self) -> String {
        self.root().map(hex::encode).unwrap_or_default()
    }

    /// Sibling path from leaf `index` up to (not including) the root.
    pub fn proof_path(&self, index: usize) -> Result<Vec<ProofStep>, CommitError> {
        let len = self.leaf_count();
        if index >= len {
            return Err(CommitError::IndexOutOfRange { index, len });
        }

        let mut path = Vec::with_capacity(self.depth());
        let mut position = index;
        for layer in &self.layers[..self.depth()] {
            let (sibling, is_left) = if position % 2 == 1 {
                (&layer[position - 1], true)
            } else if let Some(right) = layer.get(position + 1) {
                (right, false)
            } else {
                (&layer[position], false)
            };
            path.push(ProofStep {
                hash: hex::encode(sibling),
                is_left,
            });
            position /= 2;
        }
        Ok(path)
    }

    pub fn inclusion_proof(&self, index: usize, record: &Record) -> Result<InclusionProof, CommitError> {
        Ok(InclusionProof {
            index,
            record: record.clone(),
            proof: self.proof_path(index)?,
        })
    }
}
