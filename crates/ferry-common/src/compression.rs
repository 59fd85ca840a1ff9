//! Gzip helpers
//!
//! Partner files are gzipped before they reach staging and the warehouse
//! loader decompresses them again before parsing.

use crate::error::{FerryError, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};
use tracing::debug;

/// Gzip-compress `data` with the default compression level
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| FerryError::Compression(format!("gzip write failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| FerryError::Compression(format!("gzip finish failed: {}", e)))?;
    debug!("Compressed {} -> {} bytes", data.len(), compressed.len());
    Ok(compressed)
}

/// Decompress gzip-compressed data
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| FerryError::Compression(format!("gzip decode failed: {}", e)))?;
    debug!("Decompressed {} -> {} bytes", data.len(), decompressed.len());
    Ok(decompressed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_header_magic() {
        let gz = gzip(b"id,amount\n1,10\n").unwrap();
        assert_eq!(&gz[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&gz).unwrap(), b"id,amount\n1,10\n");
    }

    #[test]
    fn test_gunzip_rejects_plain_text() {
        let err = gunzip(b"not gzip at all").unwrap_err();
        assert!(matches!(err, FerryError::Compression(_)));
    }
}
