use crate::delivery::{io_error, DeliveryError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

pub const DIGEST_BLOCK_SIZE: usize = 64 * 1024;

/// Hex SHA-256 of a file, read in fixed-size blocks.
pub fn sha256_file(path: &Path) -> Result<String, DeliveryError> {
    let mut file = File::open(path).map_err(|source| io_error(path, source))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; DIGEST_BLOCK_SIZE];

    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(io_error(path, source)),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
