use crate::commit::ROOT_FILE_NAME;
use crate::delivery::digest::sha256_file;
use crate::delivery::{io_error, DeliveryError};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Describes one delivery. A changed dataset needs a new manifest and a new
/// signature; manifests are never rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub dataset_file: String,
    pub dataset_sha256: String,
    pub sample_file: String,
    pub sample_sha256: String,
    pub merkle_root_file: String,
    pub timestamp_utc: String,
}

impl Manifest {
    pub fn for_files(dataset: &Path, sample: &Path) -> Result<Self, DeliveryError> {
        Ok(Self {
            dataset_file: file_name(dataset),
            dataset_sha256: sha256_file(dataset)?,
            sample_file: file_name(sample),
            sample_sha256: sha256_file(sample)?,
            merkle_root_file: ROOT_FILE_NAME.to_string(),
            timestamp_utc: utc_timestamp(OffsetDateTime::now_utc())?,
        })
    }

    /// Writes the manifest into `dir` and returns its path together with the
    /// bytes read back from disk, which are the bytes to sign. An existing
    /// manifest in `dir` is never replaced.
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, Vec<u8>), DeliveryError> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let encoded = serde_json::to_vec_pretty(self)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        file.write_all(&encoded)
            .and_then(|()| file.sync_all())
            .map_err(|source| io_error(&path, source))?;
        drop(file);
        let on_disk = fs::read(&path).map_err(|source| io_error(&path, source))?;
        Ok((path, on_disk))
    }

    pub fn read_from(path: &Path) -> Result<Self, DeliveryError> {
        let raw = fs::read(path).map_err(|source| io_error(path, source))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// RFC 3339 at second precision, e.g. `2024-05-01T12:00:00Z`.
fn utc_timestamp(now: OffsetDateTime) -> Result<String, DeliveryError> {
    now.replace_nanosecond(0)
        .map_err(|err| DeliveryError::Timestamp(format!("out of range: {err}")))?
        .format(&Rfc3339)
        .map_err(|err| DeliveryError::Timestamp(format!("formatting failed: {err}")))
}
