// Hashing module using BLAKE3
// Fingerprints identify which model artifact produced a result.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::constants::HASH_CHUNK_SIZE;
use crate::error::Result;

/// Fingerprint of an in-memory artifact.
/// Format: "blake3:<hex>"
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("blake3:{}", hash.to_hex())
}

/// Fingerprint of a file on disk, streamed in chunks
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Short form for log lines
pub fn short(fingerprint: &str) -> &str {
    let hex = fingerprint.strip_prefix("blake3:").unwrap_or(fingerprint);
    &hex[..hex.len().min(12)]
}
