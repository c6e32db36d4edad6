// src/manifest.rs
//! Geneset and gene manifests
//!
//! A [`GeneSetManifest`] lists which content hash each gene of a geneset
//! resolves to, or points at another geneset when it is only an alias.
//! A [`GeneManifest`] describes how the content of one gene hash is split
//! into ordered, individually hashed transfer parts.

use crate::compression::CompressionFormat;
use crate::error::{Error, Result};
use crate::hash::{GeneHash, GenePartHash};
use crate::identity::{Architecture, GeneIdentifier, GeneKind, GeneSetIdentifier, UniqueGeneIdentifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use url::Url;

/// One named, architecture-specific gene entry of a geneset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneReference {
    pub name: String,
    #[serde(default)]
    pub architecture: Architecture,
    pub hash: GeneHash,
}

/// Manifest of a geneset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneSetManifest {
    pub identifier: GeneSetIdentifier,
    /// Alias target; when set this geneset carries no genes of its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<GeneSetIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catlet: Option<GeneHash>,
    #[serde(default)]
    pub fodder: Vec<GeneReference>,
    #[serde(default)]
    pub volumes: Vec<GeneReference>,
}

impl GeneSetManifest {
    /// Create an empty concrete manifest
    pub fn new(identifier: GeneSetIdentifier) -> Self {
        Self {
            identifier,
            reference: None,
            catlet: None,
            fodder: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Create a manifest that aliases another geneset
    pub fn reference(identifier: GeneSetIdentifier, target: GeneSetIdentifier) -> Self {
        Self {
            reference: Some(target),
            ..Self::new(identifier)
        }
    }

    pub fn with_catlet(mut self, hash: GeneHash) -> Self {
        self.catlet = Some(hash);
        self
    }

    pub fn with_fodder(mut self, name: &str, architecture: Architecture, hash: GeneHash) -> Self {
        self.fodder.push(GeneReference {
            name: name.to_string(),
            architecture,
            hash,
        });
        self
    }

    pub fn with_volume(mut self, name: &str, architecture: Architecture, hash: GeneHash) -> Self {
        self.volumes.push(GeneReference {
            name: name.to_string(),
            architecture,
            hash,
        });
        self
    }

    /// Returns `true` if this geneset is only an alias
    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    fn entries(&self, kind: GeneKind) -> &[GeneReference] {
        match kind {
            GeneKind::Catlet => &[],
            GeneKind::Fodder => &self.fodder,
            GeneKind::Volume => &self.volumes,
        }
    }

    /// Look up the hash of a gene, applying architecture fallback
    ///
    /// Returns the architecture of the entry that matched along with its hash.
    /// The catlet gene exists once per geneset and always matches as `any`.
    pub fn find_gene(
        &self,
        kind: GeneKind,
        name: &str,
        architecture: &Architecture,
    ) -> Option<(Architecture, GeneHash)> {
        if kind == GeneKind::Catlet {
            return self.catlet.clone().map(|hash| (Architecture::any(), hash));
        }

        let candidates = self
            .entries(kind)
            .iter()
            .filter(|entry| entry.name == name)
            .map(|entry| (&entry.architecture, entry.hash.clone()));

        architecture
            .best_match(candidates)
            .map(|(arch, hash)| (arch.clone(), hash))
    }

    /// Every gene of this geneset with its unique identifier
    pub fn genes(&self) -> Result<Vec<(UniqueGeneIdentifier, GeneHash)>> {
        let mut genes = Vec::new();
        if let Some(hash) = &self.catlet {
            genes.push((UniqueGeneIdentifier::catlet(self.identifier.clone()), hash.clone()));
        }
        for kind in [GeneKind::Fodder, GeneKind::Volume] {
            for entry in self.entries(kind) {
                let id = GeneIdentifier::new(self.identifier.clone(), &entry.name)?;
                genes.push((
                    UniqueGeneIdentifier::new(kind, id, entry.architecture.clone()),
                    entry.hash.clone(),
                ));
            }
        }
        Ok(genes)
    }

    /// Set of all gene hashes listed by this manifest
    pub fn hashes(&self) -> BTreeSet<GeneHash> {
        self.catlet
            .iter()
            .chain(self.fodder.iter().map(|e| &e.hash))
            .chain(self.volumes.iter().map(|e| &e.hash))
            .cloned()
            .collect()
    }

    /// Check structural consistency
    pub fn validate(&self) -> Result<()> {
        if let Some(target) = &self.reference {
            if target == &self.identifier {
                return Err(Error::CircularReference(vec![
                    self.identifier.to_string(),
                    target.to_string(),
                ]));
            }
            if self.catlet.is_some() || !self.fodder.is_empty() || !self.volumes.is_empty() {
                return Err(Error::Validation(format!(
                    "reference geneset {} must not list genes",
                    self.identifier
                )));
            }
            return Ok(());
        }

        for kind in [GeneKind::Fodder, GeneKind::Volume] {
            let mut seen = HashSet::new();
            for entry in self.entries(kind) {
                GeneIdentifier::new(self.identifier.clone(), &entry.name)?;
                if !seen.insert((entry.name.as_str(), &entry.architecture)) {
                    return Err(Error::Validation(format!(
                        "duplicate {} gene '{}' [{}] in geneset {}",
                        kind, entry.name, entry.architecture, self.identifier
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Manifest of a single gene's transfer representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneManifest {
    pub gene: GeneHash,
    #[serde(default)]
    pub format: CompressionFormat,
    /// Total size of all parts (compressed)
    pub size: u64,
    /// Size of the merged, uncompressed content
    pub original_size: u64,
    /// Parts in concatenation order
    pub parts: Vec<GenePartHash>,
}

impl GeneManifest {
    pub fn validate(&self) -> Result<()> {
        if self.parts.is_empty() {
            return Err(Error::Validation(format!("gene {} has no parts", self.gene)));
        }
        let unique: HashSet<&GenePartHash> = self.parts.iter().collect();
        if unique.len() != self.parts.len() {
            return Err(Error::Validation(format!(
                "gene {} lists a part more than once",
                self.gene
            )));
        }
        Ok(())
    }
}

/// Download location of one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDownload {
    pub part: GenePartHash,
    pub url: Url,
}

/// Gene manifest plus time-limited download URLs for its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneDownloadInfo {
    pub manifest: GeneManifest,
    pub parts: Vec<PartDownload>,
    pub download_expires: DateTime<Utc>,
}

impl GeneDownloadInfo {
    /// URL for a part, if the repository provided one
    pub fn url_for(&self, part: &GenePartHash) -> Option<&Url> {
        self.parts.iter().find(|p| &p.part == part).map(|p| &p.url)
    }

    /// Returns `true` if the URLs expire within `margin` of `now`
    pub fn expires_within(&self, margin: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.download_expires - now < margin
    }

    pub fn validate(&self) -> Result<()> {
        self.manifest.validate()?;
        if let Some(missing) = self.manifest.parts.iter().find(|p| self.url_for(p).is_none()) {
            return Err(Error::Validation(format!(
                "no download URL for part {} of gene {}",
                missing, self.manifest.gene
            )));
        }
        Ok(())
    }
}
