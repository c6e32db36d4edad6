// src/lib.rs

//! Genepool
//!
//! Resolves catlet genes (catlet specifications, fodder and volume images)
//! from remote genepool repositories and keeps them in a local,
//! content-addressed cache.
//!
//! # Architecture
//!
//! - Identity first: every gene is addressed as `kind::gene:org/set/tag:name[arch]`
//! - Cache ledger: a gene is readable only once its hash is in `genes.json`
//! - Resumable transfers: parts are verified on disk and never re-downloaded
//! - Single-flight: concurrent requests for one gene share one fetch

pub mod cache;
pub mod compression;
pub mod config;
mod error;
pub mod hash;
pub mod identity;
pub mod manifest;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod repository;
pub mod resolution;
pub mod worker;

pub use cache::{GeneContent, LocalGenePool};
pub use config::GenePoolConfig;
pub use error::{Error, Result};
pub use hash::{GeneHash, GenePartHash, HashAlgorithm};
pub use identity::{Architecture, GeneIdentifier, GeneKind, GeneSetIdentifier, UniqueGeneIdentifier};
pub use manifest::{GeneDownloadInfo, GeneManifest, GeneSetManifest};
pub use pool::GenePool;
pub use progress::{GeneProgress, ProgressCallback};
pub use repository::{GeneRepository, HttpGeneRepository};
pub use resolution::{GeneResolver, ResolverOptions, RetryPolicy};
