//! Section-granularity pack/unpack over zlib.

use crate::error::ErrorKind;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// zlib level used when the caller does not pick one.
pub const DEFAULT_LEVEL: u32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("compression failed")]
    Pack(#[source] std::io::Error),
    #[error("decompression failed")]
    Unpack(#[source] std::io::Error),
    #[error("section unpacked to {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("compression level {0} is outside 0..=9")]
    InvalidLevel(u32),
}

impl CompressionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompressionError::InvalidLevel(_) => ErrorKind::InvalidArgument,
            _ => ErrorKind::Compression,
        }
    }
}

/// A packed section and the size it unpacks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    pub data: Vec<u8>,
    pub unpacked_size: usize,
}

pub fn pack(bytes: &[u8], level: u32) -> Result<Packed, CompressionError> {
    if level > 9 {
        return Err(CompressionError::InvalidLevel(level));
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(bytes).map_err(CompressionError::Pack)?;
    let data = encoder.finish().map_err(CompressionError::Pack)?;
    Ok(Packed {
        data,
        unpacked_size: bytes.len(),
    })
}

/// Unpack `data`, which must inflate to exactly `expected` bytes. Output is
/// capped one byte past `expected` so a hostile stream cannot balloon.
pub fn unpack(data: &[u8], expected: usize) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(CompressionError::Unpack)?;
    if out.len() != expected {
        return Err(CompressionError::SizeMismatch {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}
