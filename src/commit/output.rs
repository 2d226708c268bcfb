//! On-disk layout of a commitment: `merkle_root.txt` plus one JSON proof per
//! sampled row under `inclusion_proofs/`.

use crate::commit::merkle::{InclusionProof, MerkleTree};
use crate::commit::record::Record;
use crate::commit::CommitError;
use std::fs;
use std::path::{Path, PathBuf};

pub const ROOT_FILE_NAME: &str = "merkle_root.txt";
pub const PROOF_DIR_NAME: &str = "inclusion_proofs";
/// Rows sampled when the caller names none.
pub const DEFAULT_SAMPLE_COUNT: usize = 10;

pub fn proof_file_name(index: usize) -> String {
    format!("sample_row_{index}.json")
}

/// The first `DEFAULT_SAMPLE_COUNT` row indexes, clamped to `len`.
pub fn default_samples(len: usize) -> Vec<usize> {
    (0..len.min(DEFAULT_SAMPLE_COUNT)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentArtifacts {
    pub root_hex: String,
    pub root_file: PathBuf,
    pub proof_files: Vec<PathBuf>,
    pub leaf_count: usize,
}

/// Builds the tree over `records` in their given order, writes the root and a
/// proof for every index in `samples`. Row order must match the delivered
/// dataset exactly. Explicit samples are strict: one index past the end fails
/// the whole commitment. See [`default_samples`] for the lenient default.
pub fn write_commitment(
    records: &[Record],
    samples: &[usize],
    out_dir: &Path,
) -> Result<CommitmentArtifacts, CommitError> {
    if records.is_empty() {
        return Err(CommitError::EmptyDataset);
    }
    let tree = MerkleTree::from_records(records);

    // Validate every sample before touching the filesystem.
    let proofs = samples
        .iter()
        .map(|&index| {
            let record = records.get(index).ok_or(CommitError::IndexOutOfRange {
                index,
                len: records.len(),
            })?;
            tree.inclusion_proof(index, record)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let proof_dir = out_dir.join(PROOF_DIR_NAME);
    fs::create_dir_all(&proof_dir).map_err(|source| io_error(&proof_dir, source))?;

    let root_hex = tree.root_hex();
    let root_file = out_dir.join(ROOT_FILE_NAME);
    fs::write(&root_file, format!("{root_hex}\n")).map_err(|source| io_error(&root_file, source))?;

    let mut proof_files = Vec::with_capacity(proofs.len());
    for proof in &proofs {
        let path = proof_dir.join(proof_file_name(proof.index));
        let encoded = serde_json::to_vec_pretty(proof).map_err(|source| CommitError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, encoded).map_err(|source| io_error(&path, source))?;
        proof_files.push(path);
    }

    tracing::info!(
        root = %root_hex,
        leaves = tree.leaf_count(),
        proofs = proof_files.len(),
        out_dir = %out_dir.display(),
        "commitment written"
    );

    Ok(CommitmentArtifacts {
        root_hex,
        root_file,
        proof_files,
        leaf_count: tree.leaf_count(),
    })
}

/// Reads a root file, trimming surrounding whitespace.
pub fn read_root_file(path: &Path) -> Result<String, CommitError> {
    let raw = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    Ok(raw.trim().to_string())
}

pub fn read_proof_file(path: &Path) -> Result<InclusionProof, CommitError> {
    let raw = fs::read(path).map_err(|source| io_error(path, source))?;
    serde_json::from_slice(&raw).map_err(|source| CommitError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn io_error(path: &Path, source: std::io::Error) -> CommitError {
    CommitError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::verify::verify_proof;

    fn rows() -> Vec<Record> {
        vec![
            Record::from_values(["0xaa", "10"]),
            Record::new(vec![Some("0xbb".into()), None]),
            Record::from_values(["0xcc", "30"]),
        ]
    }

    #[test]
    fn writes_root_and_sampled_proofs() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = write_commitment(&rows(), &[0, 2], dir.path()).unwrap();

        assert_eq!(artifacts.leaf_count, 3);
        assert_eq!(read_root_file(&artifacts.root_file).unwrap(), artifacts.root_hex);
        assert_eq!(
            artifacts.proof_files,
            vec![
                dir.path().join("inclusion_proofs/sample_row_0.json"),
                dir.path().join("inclusion_proofs/sample_row_2.json"),
            ]
        );

        for path in &artifacts.proof_files {
            let proof = read_proof_file(path).unwrap();
            assert!(verify_proof(&proof, &artifacts.root_hex).unwrap().matches);
        }
    }

    #[test]
    fn default_samples_are_clamped_to_the_dataset() {
        assert_eq!(default_samples(25), (0..10).collect::<Vec<_>>());
        assert_eq!(default_samples(3), vec![0, 1, 2]);
        assert!(default_samples(0).is_empty());

        let dir = tempfile::tempdir().unwrap();
        let records = rows();
        let artifacts = write_commitment(&records, &default_samples(records.len()), dir.path()).unwrap();
        assert_eq!(artifacts.proof_files.len(), 3);
        assert!(dir.path().join("inclusion_proofs/sample_row_2.json").exists());
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            write_commitment(&[], &[], dir.path()),
            Err(CommitError::EmptyDataset)
        ));
    }

    #[test]
    fn out_of_range_sample_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_commitment(&rows(), &[1, 5], dir.path()).unwrap_err();

        assert!(matches!(err, CommitError::IndexOutOfRange { index: 5, len: 3 }));
        assert!(!dir.path().join(ROOT_FILE_NAME).exists());
    }

    #[test]
    fn unreadable_proof_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{not json").unwrap();

        assert!(matches!(read_proof_file(&path), Err(CommitError::Json { .. })));
        assert!(matches!(
            read_root_file(&dir.path().join("missing.txt")),
            Err(CommitError::Io { .. })
        ));
    }
}
