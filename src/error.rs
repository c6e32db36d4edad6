// src/error.rs

//! Error types for genepool operations
//!
//! Every variant carries owned strings so the error is `Clone`: the request
//! registry hands one terminal result to every caller waiting on a gene.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// All errors that can occur while resolving, downloading or caching genes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed identifier, hash or manifest value
    #[error("Validation error: {0}")]
    Validation(String),

    /// A geneset reference chain loops back on itself
    #[error("Circular geneset reference: {}", .0.join(" -> "))]
    CircularReference(Vec<String>),

    /// The resolved geneset does not contain the requested gene
    #[error("Gene {gene} is not part of geneset {geneset}")]
    GeneNotInSet { gene: String, geneset: String },

    /// Content did not match its declared hash or size
    #[error("Integrity check failed for {subject}: expected {expected}, got {actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Download URLs are about to expire and must be refreshed
    #[error("Download URLs expire at {expires} and are too close to expiry")]
    UrlExpiring { expires: DateTime<Utc> },

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A repository rejected the request (4xx other than 404)
    #[error("Repository '{repository}' rejected the request (HTTP {status}): {message}")]
    ClientError {
        repository: String,
        status: u16,
        message: String,
    },

    /// Server error, timeout or transport failure; another repository may succeed
    #[error("Repository '{repository}' failed: {message}")]
    Transient { repository: String, message: String },

    /// Every configured repository failed and nothing usable was cached
    #[error("All repositories failed for {subject}: {}", .failures.join("; "))]
    AllRepositoriesFailed {
        subject: String,
        failures: Vec<String>,
    },

    /// Some parts were still missing after the bounded retry rounds
    #[error("Incomplete transfer for {gene}: {missing} of {total} parts missing")]
    IncompleteTransfer {
        gene: String,
        missing: usize,
        total: usize,
    },

    /// Local cache I/O failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Local cache metadata could not be parsed
    #[error("Corrupt cache entry {path}: {message}")]
    Corruption { path: String, message: String },

    /// The operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to initialise a component (HTTP client, runtime resources)
    #[error("Initialization error: {0}")]
    Init(String),

    /// Unexpected failure inside the worker
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error with context
    pub fn storage(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }

    /// Create a transient repository error
    pub fn transient(repository: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            repository: repository.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if trying another repository or another round may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. }
                | Self::Integrity { .. }
                | Self::UrlExpiring { .. }
                | Self::AllRepositoriesFailed { .. }
        )
    }

    /// Returns `true` for configuration-class repository failures
    ///
    /// These abort a multi-repository search instead of falling through.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ClientError { .. })
    }

    /// Returns `true` if a local cache failure should be treated as a miss
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Corruption { .. })
    }

    /// Returns `true` for errors that no retry can fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::CircularReference(_)
                | Self::GeneNotInSet { .. }
                | Self::ClientError { .. }
                | Self::Config(_)
                | Self::Cancelled
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Corruption {
            path: "<json>".to_string(),
            message: err.to_string(),
        }
    }
}
