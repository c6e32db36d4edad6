// src/hash.rs

//! Content hashes for genes and gene parts
//!
//! Two hash families are used:
//! - **SHA-256** identifies the uncompressed content of a whole gene ([`GeneHash`])
//! - **SHA-1** identifies one compressed transfer part of a gene ([`GenePartHash`])
//!
//! Both are written as `<algorithm>:<hex digest>`, e.g. `sha256:9f86d0...`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit), used for whole genes
    Sha256,
    /// SHA-1 (160-bit), used for transfer parts
    Sha1,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha1 => 20,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as used in prefixed hash strings
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            _ => Err(Error::Validation(format!("unsupported hash algorithm: {s}"))),
        }
    }
}

/// Parse `<algorithm>:<hex>` and check it against the one allowed algorithm
fn parse_prefixed(s: &str, allowed: HashAlgorithm) -> Result<String> {
    let (algo, value) = s
        .split_once(':')
        .ok_or_else(|| Error::Validation(format!("hash is missing an algorithm prefix: {s}")))?;

    let algorithm: HashAlgorithm = algo.parse()?;
    if algorithm != allowed {
        return Err(Error::Validation(format!(
            "unsupported hash algorithm '{algorithm}' (expected {allowed}): {s}"
        )));
    }

    validate_hex(value, allowed)?;
    Ok(value.to_lowercase())
}

fn validate_hex(value: &str, algorithm: HashAlgorithm) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("empty {algorithm} hash value")));
    }
    if value.len() != algorithm.hex_len() {
        return Err(Error::Validation(format!(
            "invalid {algorithm} hash length: expected {}, got {}",
            algorithm.hex_len(),
            value.len()
        )));
    }
    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!("invalid hex in {algorithm} hash: {value}")));
    }
    Ok(())
}

macro_rules! prefixed_hash {
    ($(#[$meta:meta])* $name:ident, $algorithm:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name {
            value: String,
        }

        impl $name {
            /// Algorithm used by this hash type
            pub const ALGORITHM: HashAlgorithm = $algorithm;

            /// Parse a prefixed hash string
            pub fn parse(s: &str) -> Result<Self> {
                Ok(Self {
                    value: parse_prefixed(s.trim(), Self::ALGORITHM)?,
                })
            }

            /// Create from a bare hex digest
            pub fn from_hex(value: &str) -> Result<Self> {
                validate_hex(value, Self::ALGORITHM)?;
                Ok(Self {
                    value: value.to_lowercase(),
                })
            }

            /// Hash a byte slice
            pub fn compute(data: &[u8]) -> Self {
                let mut hasher = Hasher::new(Self::ALGORITHM);
                hasher.update(data);
                hasher.finalize_as()
            }

            /// The hex digest without prefix
            #[inline]
            pub fn hash_value(&self) -> &str {
                &self.value
            }

            /// Check whether a file on disk hashes to this value
            pub fn matches_file(&self, path: &Path) -> io::Result<bool> {
                let mut file = std::fs::File::open(path)?;
                let actual = hash_reader(Self::ALGORITHM, &mut file)?;
                Ok(actual == self.value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", Self::ALGORITHM.name(), self.value)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                Self::parse(&s)
            }
        }

        impl From<$name> for String {
            fn from(hash: $name) -> Self {
                hash.to_string()
            }
        }

        impl FinalizeAs for $name {
            fn from_digest(value: String) -> Self {
                Self { value }
            }
        }
    };
}

prefixed_hash!(
    /// Hash of a whole gene's uncompressed content (`sha256:<hex>`)
    GeneHash,
    HashAlgorithm::Sha256
);

prefixed_hash!(
    /// Hash of one compressed transfer part of a gene (`sha1:<hex>`)
    GenePartHash,
    HashAlgorithm::Sha1
);

/// Hash types that can be produced directly from a finished [`Hasher`]
pub trait FinalizeAs {
    #[doc(hidden)]
    fn from_digest(value: String) -> Self;
}

/// Incremental hasher for streaming content
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Sha1(Sha1),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
        };
        Self { state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Sha1(hasher) => hasher.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Sha256(hasher) => hex::encode(hasher.finalize()),
            HasherState::Sha1(hasher) => hex::encode(hasher.finalize()),
        }
    }

    /// Finalize into a typed hash
    pub fn finalize_as<H: FinalizeAs>(self) -> H {
        H::from_digest(self.finalize())
    }
}

/// Compute the hex digest of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}
