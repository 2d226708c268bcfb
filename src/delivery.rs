pub mod digest;
pub mod manifest;
pub mod signer;

use std::fmt;
use std::path::PathBuf;

pub use digest::{sha256_file, DIGEST_BLOCK_SIZE};
pub use manifest::{Manifest, MANIFEST_FILE_NAME};
pub use signer::{
    load_verifying_key, verify_delivery, verify_signature, DeliveryArtifacts, DeliverySigner,
    KeySource, PUBLIC_KEY_FILE_NAME, SIGNATURE_FILE_NAME,
};

/// Failures of the signing stage: unreadable key material or files, never
/// network conditions.
#[derive(Debug)]
pub enum DeliveryError {
    KeyMaterial(String),
    Io { path: PathBuf, source: std::io::Error },
    Json(serde_json::Error),
    Signature(String),
    Timestamp(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::KeyMaterial(reason) => write!(f, "unusable key material: {reason}"),
            DeliveryError::Io { path, source } => {
                write!(f, "i/o error on {}: {source}", path.display())
            }
            DeliveryError::Json(err) => write!(f, "manifest encoding failed: {err}"),
            DeliveryError::Signature(reason) => write!(f, "signature error: {reason}"),
            DeliveryError::Timestamp(reason) => write!(f, "manifest timestamp: {reason}"),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Io { source, .. } => Some(source),
            DeliveryError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        DeliveryError::Json(err)
    }
}

pub(crate) fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> DeliveryError {
    DeliveryError::Io {
        path: path.into(),
        source,
    }
}
