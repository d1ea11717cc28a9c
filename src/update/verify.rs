//! Integrity checks for downloaded artifacts.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::errors::UpdateError;

/// Lowercase hex SHA-256 of a file, read in chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn normalize_checksum(value: &str) -> String {
    let value = value.trim();
    let value = value
        .get(..7)
        .filter(|prefix| prefix.eq_ignore_ascii_case("sha256:"))
        .map(|_| &value[7..])
        .unwrap_or(value);
    value.to_ascii_lowercase()
}

/// Checks the declared checksum and size, whichever are present.
pub fn verify_artifact(
    path: &Path,
    checksum: Option<&str>,
    size: Option<u64>,
) -> Result<(), UpdateError> {
    if let Some(expected) = checksum.map(normalize_checksum).filter(|c| !c.is_empty()) {
        let actual = sha256_file(path)?;
        if actual != expected {
            return Err(UpdateError::ChecksumMismatch { expected, actual });
        }
    }
    if let Some(expected) = size {
        let actual = path.metadata()?.len();
        if actual != expected {
            return Err(UpdateError::SizeMismatch { expected, actual });
        }
    }
    Ok(())
}
