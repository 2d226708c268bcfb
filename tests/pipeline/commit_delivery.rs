use std::fs;

use anyhow::Result;
use harvestproof::commit::{read_proof_file, read_root_file, ROOT_FILE_NAME};
use harvestproof::delivery::{verify_delivery, MANIFEST_FILE_NAME};
use harvestproof::{verify_proof, write_commitment, DeliverySigner, KeySource, Record};

use crate::support::helpers::init_tracing;

fn dataset_rows() -> Vec<Record> {
    (0..9u64)
        .map(|i| {
            Record::new(vec![
                Some(format!("0x{:040x}", i + 1)),
                Some(format!("{}.{:02}", 1000 - i * 37, i)),
                if i % 4 == 0 { None } else { Some("active".into()) },
            ])
        })
        .collect()
}

#[test]
fn committed_samples_verify_offline_and_delivery_is_signed() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let rows = dataset_rows();

    let commitment = write_commitment(&rows, &[0, 4, 8], dir.path())?;
    let root = read_root_file(&dir.path().join(ROOT_FILE_NAME))?;
    assert_eq!(root, commitment.root_hex);

    for path in &commitment.proof_files {
        let proof = read_proof_file(path)?;
        assert_eq!(proof.record, rows[proof.index]);
        assert!(verify_proof(&proof, &root)?.matches);
    }

    let dataset = dir.path().join("dataset.json");
    let sample = dir.path().join("sample.json");
    fs::write(&dataset, serde_json::to_vec(&rows)?)?;
    fs::write(&sample, serde_json::to_vec(&rows[..3])?)?;

    let delivery = dir.path().join("delivery");
    let artifacts = DeliverySigner::new(KeySource::Ephemeral).sign_delivery(&dataset, &sample, &delivery)?;
    assert_eq!(artifacts.manifest.merkle_root_file, ROOT_FILE_NAME);
    assert!(verify_delivery(&delivery)?);

    // Any edit to the manifest after signing is detected.
    let manifest_path = delivery.join(MANIFEST_FILE_NAME);
    let edited = fs::read_to_string(&manifest_path)?.replace("dataset.json", "dataset.jsoN");
    fs::write(&manifest_path, edited)?;
    assert!(!verify_delivery(&delivery)?);
    Ok(())
}

#[test]
fn proof_from_another_dataset_does_not_match() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let rows = dataset_rows();
    let original = write_commitment(&rows, &[2], &dir.path().join("a"))?;

    let mut changed = rows.clone();
    changed.swap(0, 1);
    let reordered = write_commitment(&changed, &[], &dir.path().join("b"))?;
    assert_ne!(original.root_hex, reordered.root_hex);

    let proof = read_proof_file(&original.proof_files[0])?;
    let outcome = verify_proof(&proof, &reordered.root_hex)?;
    assert!(!outcome.matches);
    assert_eq!(outcome.expected, reordered.root_hex);
    Ok(())
}
