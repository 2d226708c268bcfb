//! Detached ed25519 signatures over the delivery manifest.

use crate::delivery::manifest::{Manifest, MANIFEST_FILE_NAME};
use crate::delivery::{io_error, DeliveryError};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};

pub const SIGNATURE_FILE_NAME: &str = "manifest.json.sig";
pub const PUBLIC_KEY_FILE_NAME: &str = "ed25519_public.pem";

/// Where the signing key comes from. An ephemeral key lives only for the
/// duration of one `sign_delivery` call and is never written anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// PKCS#8 PEM private key.
    PemFile(PathBuf),
    Ephemeral,
}

impl From<Option<PathBuf>> for KeySource {
    fn from(path: Option<PathBuf>) -> Self {
        path.map_or(KeySource::Ephemeral, KeySource::PemFile)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryArtifacts {
    pub manifest: Manifest,
    pub manifest_file: PathBuf,
    pub signature_file: PathBuf,
    pub public_key_file: PathBuf,
    pub public_key_pem: String,
    pub ephemeral_key: bool,
}

#[derive(Debug, Clone)]
pub struct DeliverySigner {
    source: KeySource,
}

impl DeliverySigner {
    pub fn new(source: KeySource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &KeySource {
        &self.source
    }

    /// Hashes `dataset` and `sample`, writes the manifest into `out_dir` and
    /// signs the manifest bytes exactly as they were written.
    pub fn sign_delivery(
        &self,
        dataset: &Path,
        sample: &Path,
        out_dir: &Path,
    ) -> Result<DeliveryArtifacts, DeliveryError> {
        fs::create_dir_all(out_dir).map_err(|source| io_error(out_dir, source))?;

        let manifest = Manifest::for_files(dataset, sample)?;
        let (manifest_file, manifest_bytes) = manifest.write_to(out_dir)?;

        // The signing key is dropped, and zeroized, at the end of this block.
        let (signature, verifying_key) = {
            let signing_key = self.signing_key()?;
            (signing_key.sign(&manifest_bytes), signing_key.verifying_key())
        };

        if verifying_key.verify(&manifest_bytes, &signature).is_err() {
            return Err(DeliveryError::Signature(
                "fresh signature failed self-verification".into(),
            ));
        }

        let public_key_pem = verifying_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| DeliveryError::KeyMaterial(format!("cannot encode public key: {err}")))?;

        let signature_file = out_dir.join(SIGNATURE_FILE_NAME);
        fs::write(&signature_file, signature.to_bytes())
            .map_err(|source| io_error(&signature_file, source))?;
        let public_key_file = out_dir.join(PUBLIC_KEY_FILE_NAME);
        fs::write(&public_key_file, public_key_pem.as_bytes())
            .map_err(|source| io_error(&public_key_file, source))?;

        let ephemeral_key = self.source == KeySource::Ephemeral;
        tracing::info!(
            manifest = %manifest_file.display(),
            dataset_sha256 = %manifest.dataset_sha256,
            ephemeral_key,
            "delivery manifest signed"
        );

        Ok(DeliveryArtifacts {
            manifest,
            manifest_file,
            signature_file,
            public_key_file,
            public_key_pem,
            ephemeral_key,
        })
    }

    fn signing_key(&self) -> Result<SigningKey, DeliveryError> {
        match &self.source {
            KeySource::Ephemeral => Ok(SigningKey::generate(&mut OsRng)),
            KeySource::PemFile(path) => {
                let pem = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
                SigningKey::from_pkcs8_pem(&pem).map_err(|err| {
                    DeliveryError::KeyMaterial(format!(
                        "{} is not a PKCS#8 ed25519 key: {err}",
                        path.display()
                    ))
                })
            }
        }
    }
}

/// Checks a detached signature. Malformed signature bytes verify as false.
pub fn verify_signature(message: &[u8], signature: &[u8], public_key: &VerifyingKey) -> bool {
    match Signature::from_slice(signature) {
        Ok(signature) => public_key.verify(message, &signature).is_ok(),
        Err(_) => false,
    }
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, DeliveryError> {
    let pem = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    VerifyingKey::from_public_key_pem(&pem).map_err(|err| {
        DeliveryError::KeyMaterial(format!("{} is not an ed25519 public key: {err}", path.display()))
    })
}

/// Verifies the manifest, signature and public key found in a delivery
/// directory.
pub fn verify_delivery(dir: &Path) -> Result<bool, DeliveryError> {
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    let signature_path = dir.join(SIGNATURE_FILE_NAME);
    let manifest = fs::read(&manifest_path).map_err(|source| io_error(&manifest_path, source))?;
    let signature = fs::read(&signature_path).map_err(|source| io_error(&signature_path, source))?;
    let public_key = load_verifying_key(&dir.join(PUBLIC_KEY_FILE_NAME))?;
    Ok(verify_signature(&manifest, &signature, &public_key))
}
