//! Compression for stored artifact blobs.

use gantry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Codec applied to blobs at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Zstd,
}

const ZSTD_LEVEL: i32 = 3;

/// Compress data using the specified codec.
pub fn compress(data: &[u8], codec: Compression) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Zstd => compress_zstd(data),
    }
}

/// Decompress data using the specified codec.
pub fn decompress(data: &[u8], codec: Compression) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Zstd => decompress_zstd(data),
    }
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)
        .map_err(|e| Error::ArtifactStore(format!("zstd compression failed: {e}")))?;
    encoder
        .write_all(data)
        .map_err(|e| Error::ArtifactStore(format!("zstd write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::ArtifactStore(format!("zstd finish failed: {e}")))
}

fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(data)
        .map_err(|e| Error::ArtifactStore(format!("zstd decompression failed: {e}")))?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::ArtifactStore(format!("zstd read failed: {e}")))?;
    Ok(output)
}
