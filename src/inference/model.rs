//! Model artifact checks
//!
//! Cheap sanity checks on a GGUF file before handing it to llama.cpp, so a
//! truncated or wrong download fails with a readable error.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// Fixed header size: magic, version, tensor count, metadata kv count
const HEADER_LEN: usize = 4 + 4 + 8 + 8;

/// Errors that can occur while inspecting a model artifact
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to open file: {0}")]
    FileOpen(#[from] io::Error),

    #[error("Invalid GGUF file: magic bytes mismatch (expected 0x{:08X}, got 0x{:08X})", GGUF_MAGIC, .0)]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File too small to be valid GGUF")]
    FileTooSmall,
}

/// Header fields of a GGUF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

impl GgufHeader {
    /// Parses the fixed-size header at the start of a GGUF stream
    pub fn read_from<R: Read>(reader: R) -> Result<Self, ModelError> {
        let mut raw = [0u8; HEADER_LEN];
        let mut filled = 0;
        let mut reader = reader.take(HEADER_LEN as u64);
        while filled < HEADER_LEN {
            match reader.read(&mut raw[filled..])? {
                0 => return Err(ModelError::FileTooSmall),
                n => filled += n,
            }
        }

        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&raw[at..at + 8]);
            u64::from_le_bytes(bytes)
        };

        let magic = u32_at(0);
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        // llama.cpp reads v2 and v3
        let version = u32_at(4);
        if !(2..=3).contains(&version) {
            return Err(ModelError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            tensor_count: u64_at(8),
            metadata_kv_count: u64_at(16),
        })
    }
}

/// Validates that a file is a GGUF model and returns its header.
pub fn validate_gguf<P: AsRef<Path>>(path: P) -> Result<GgufHeader, ModelError> {
    GgufHeader::read_from(File::open(path)?)
}
