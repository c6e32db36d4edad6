// src/cache/layout.rs

//! On-disk layout of the gene cache
//!
//! ```text
//! <root>/<org>/<geneset>/<tag>/
//!     manifest.json              cached geneset manifest
//!     genes.json                 ledger of fully merged gene hashes
//!     catlet.yaml                merged content (see UniqueGeneIdentifier::artifact_path)
//!     fodder/<arch>/<name>.yaml
//!     volumes/<arch>/<name>.vhdx
//!     .tmp/<gene hash>/
//!         manifest.json          gene manifest of an in-progress download
//!         <part hash>            verified or in-flight part files
//! ```

use crate::hash::{GeneHash, GenePartHash};
use crate::identity::{GeneSetIdentifier, UniqueGeneIdentifier};
use std::path::{Path, PathBuf};

pub const GENESET_MANIFEST_FILE: &str = "manifest.json";
pub const LEDGER_FILE: &str = "genes.json";
pub const GENE_MANIFEST_FILE: &str = "manifest.json";
pub const TEMP_DIR: &str = ".tmp";

/// Path computations for a cache root
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn geneset_dir(&self, id: &GeneSetIdentifier) -> PathBuf {
        self.root
            .join(id.organization())
            .join(id.geneset())
            .join(id.tag())
    }

    pub fn geneset_manifest(&self, id: &GeneSetIdentifier) -> PathBuf {
        self.geneset_dir(id).join(GENESET_MANIFEST_FILE)
    }

    pub fn ledger(&self, id: &GeneSetIdentifier) -> PathBuf {
        self.geneset_dir(id).join(LEDGER_FILE)
    }

    /// Location of the merged content of a gene
    pub fn content(&self, id: &UniqueGeneIdentifier) -> PathBuf {
        self.geneset_dir(id.geneset()).join(id.artifact_path())
    }

    /// Temp directory holding the parts of one gene hash
    pub fn temp_dir(&self, geneset: &GeneSetIdentifier, hash: &GeneHash) -> PathBuf {
        self.geneset_dir(geneset).join(TEMP_DIR).join(hash.hash_value())
    }

    pub fn temp_manifest(&self, geneset: &GeneSetIdentifier, hash: &GeneHash) -> PathBuf {
        self.temp_dir(geneset, hash).join(GENE_MANIFEST_FILE)
    }

    pub fn part(&self, geneset: &GeneSetIdentifier, hash: &GeneHash, part: &GenePartHash) -> PathBuf {
        self.temp_dir(geneset, hash).join(part.hash_value())
    }
}
