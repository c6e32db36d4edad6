// src/compression/mod.rs
//! Decompression of gene transfer streams
//!
//! A gene is transferred as one compressed stream split into parts. The parts
//! are concatenated in declared order and the result is decoded as a single
//! stream in the format named by the gene manifest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use thiserror::Error;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to create {format} decoder: {source}")]
    DecoderCreation {
        format: &'static str,
        source: io::Error,
    },

    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),
}

impl From<CompressionError> for crate::Error {
    fn from(err: CompressionError) -> Self {
        crate::Error::Validation(err.to_string())
    }
}

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompressionFormat {
    /// No compression (raw data)
    #[default]
    None,
    /// Gzip compression
    Gzip,
    /// XZ/LZMA compression
    Xz,
    /// Zstandard compression
    Zstd,
}

impl CompressionFormat {
    /// Parse a format identifier as used in gene manifests
    ///
    /// Accepts the canonical names plus common aliases (`gz`, `zst`, `plain`).
    pub fn from_name(name: &str) -> Result<Self, CompressionError> {
        match name.trim().to_lowercase().as_str() {
            "" | "none" | "plain" | "raw" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "xz" | "lzma" => Ok(Self::Xz),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(CompressionError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CompressionFormat {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl TryFrom<String> for CompressionFormat {
    type Error = CompressionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_name(&s)
    }
}

impl From<CompressionFormat> for String {
    fn from(format: CompressionFormat) -> Self {
        format.name().to_string()
    }
}

/// Create a decompressing reader for the given format
///
/// Returns a boxed `Read` implementation that decompresses data on the fly.
/// For `CompressionFormat::None`, returns the reader unchanged.
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        CompressionFormat::None => Ok(Box::new(reader)),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| CompressionError::DecoderCreation {
                format: "zstd",
                source: e,
            })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Chain a sequence of readers into one, read strictly in order
pub fn concat_readers<'a, I>(readers: I) -> Box<dyn Read + 'a>
where
    I: IntoIterator<Item = Box<dyn Read + 'a>>,
{
    readers
        .into_iter()
        .fold(Box::new(io::empty()) as Box<dyn Read + 'a>, |acc, next| {
            Box::new(acc.chain(next))
        })
}
