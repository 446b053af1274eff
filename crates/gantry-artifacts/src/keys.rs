//! Checksums and on-disk naming for artifacts.

use sha2::{Digest, Sha256};

/// Hex-encoded sha256 of `data`.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Sanitize an artifact name for use in filenames.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();
    match sanitized.as_str() {
        "" | "." | ".." => format!("_{sanitized}"),
        _ => sanitized,
    }
}
