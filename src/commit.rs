pub mod merkle;
pub mod output;
pub mod record;
pub mod verify;

use std::fmt;
use std::path::PathBuf;

pub use merkle::{hash_leaf, hash_node, Digest32, InclusionProof, MerkleTree, ProofStep};
pub use output::{
    default_samples, proof_file_name, read_proof_file, read_root_file, write_commitment,
    CommitmentArtifacts, DEFAULT_SAMPLE_COUNT, PROOF_DIR_NAME, ROOT_FILE_NAME,
};
pub use record::{Record, FIELD_SEPARATOR};
pub use verify::{compute_root, verify_proof, Verification};

/// Failures of the commitment stage. These are data or filesystem problems and
/// never the result of network conditions.
#[derive(Debug)]
pub enum CommitError {
    EmptyDataset,
    IndexOutOfRange { index: usize, len: usize },
    InvalidDigest(String),
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::EmptyDataset => write!(f, "cannot commit an empty dataset"),
            CommitError::IndexOutOfRange { index, len } => {
                write!(f, "row index {index} out of range for {len} rows")
            }
            CommitError::InvalidDigest(raw) => write!(f, "invalid digest: {raw}"),
            CommitError::Io { path, source } => {
                write!(f, "i/o error on {}: {source}", path.display())
            }
            CommitError::Json { path, source } => {
                write!(f, "invalid json in {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommitError::Io { source, .. } => Some(source),
            CommitError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}
