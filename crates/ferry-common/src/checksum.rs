//! Checksum utilities for staged object fingerprints

use crate::error::{FerryError, Result};
use sha2::{Digest, Sha256};

/// Hex-encoded MD5 of `data`, matching what object stores report as a
/// content hash for single-part uploads.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that `data` hashes to `expected` (MD5, hex)
pub fn verify_md5(data: &[u8], expected: &str) -> Result<()> {
    let actual = md5_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(FerryError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
