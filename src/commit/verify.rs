//! Offline proof checking. Needs only the proof object and the published root.

use crate::commit::merkle::{hash_leaf, hash_node, Digest32, InclusionProof};
use crate::commit::CommitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub computed: String,
    pub expected: String,
    pub matches: bool,
}

/// Folds the proof path over the row's leaf hash.
pub fn compute_root(proof: &InclusionProof) -> Result<Digest32, CommitError> {
    let mut current = hash_leaf(&proof.record.canonical_bytes());
    for step in &proof.proof {
        let sibling = parse_digest(&step.hash)?;
        current = if step.is_left {
            hash_node(&sibling, &current)
        } else {
            hash_node(&current, &sibling)
        };
    }
    Ok(current)
}

/// Compares the recomputed root with `expected_root` (hex, optional `0x`,
/// surrounding whitespace ignored).
pub fn verify_proof(proof: &InclusionProof, expected_root: &str) -> Result<Verification, CommitError> {
    let computed = hex::encode(compute_root(proof)?);
    let expected = normalize_hex(expected_root);
    Ok(Verification {
        matches: computed == expected,
        computed,
        expected,
    })
}

fn normalize_hex(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

fn parse_digest(raw: &str) -> Result<Digest32, CommitError> {
    let bytes = hex::decode(normalize_hex(raw)).map_err(|_| CommitError::InvalidDigest(raw.to_owned()))?;
    Digest32::try_from(bytes.as_slice()).map_err(|_| CommitError::InvalidDigest(raw.to_owned()))
}
