// src/identity/gene.rs

//! Gene identifiers
//!
//! - [`GeneIdentifier`]: `gene:acme/ubuntu/22.04:sda` (geneset + gene name)
//! - [`UniqueGeneIdentifier`]: kind + gene identifier + architecture, written
//!   `volume::gene:acme/ubuntu/22.04:sda[hyperv/amd64]`. This is the cache key
//!   for a single artifact.

use super::architecture::Architecture;
use super::geneset::{normalize_part, GeneSetIdentifier, NamePart};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Prefix used in the textual gene identifier
const GENE_PREFIX: &str = "gene:";

/// Name given to the catlet template gene of a geneset
pub const CATLET_GENE_NAME: &str = "catlet";

/// Kind of artifact a gene holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneKind {
    /// Catlet template
    Catlet,
    /// Fodder (configuration) script
    Fodder,
    /// Disk volume image
    Volume,
}

impl GeneKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Catlet => "catlet",
            Self::Fodder => "fodder",
            Self::Volume => "volume",
        }
    }
}

impl fmt::Display for GeneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for GeneKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "catlet" | "template" => Ok(Self::Catlet),
            "fodder" => Ok(Self::Fodder),
            "volume" => Ok(Self::Volume),
            other => Err(Error::Validation(format!("unknown gene kind: {other}"))),
        }
    }
}

/// A named gene within a geneset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeneIdentifier {
    geneset: GeneSetIdentifier,
    name: String,
}

impl GeneIdentifier {
    pub fn new(geneset: GeneSetIdentifier, name: &str) -> Result<Self> {
        Ok(Self {
            geneset,
            name: normalize_part(name, NamePart::Gene)?,
        })
    }

    /// Parse `[gene:]organization/geneset[/tag]:name`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let body = s.strip_prefix(GENE_PREFIX).unwrap_or(s);
        let (set, name) = body
            .rsplit_once(':')
            .ok_or_else(|| Error::Validation(format!("gene identifier '{s}' is missing ':name'")))?;
        Self::new(GeneSetIdentifier::parse(set)?, name)
    }

    pub fn geneset(&self) -> &GeneSetIdentifier {
        &self.geneset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same gene name inside another geneset
    pub fn with_geneset(&self, geneset: GeneSetIdentifier) -> Self {
        Self {
            geneset,
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for GeneIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", GENE_PREFIX, self.geneset, self.name)
    }
}

impl FromStr for GeneIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GeneIdentifier {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<GeneIdentifier> for String {
    fn from(id: GeneIdentifier) -> Self {
        id.to_string()
    }
}

/// Fully qualified cache key of one artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueGeneIdentifier {
    kind: GeneKind,
    id: GeneIdentifier,
    architecture: Architecture,
}

impl UniqueGeneIdentifier {
    pub fn new(kind: GeneKind, id: GeneIdentifier, architecture: Architecture) -> Self {
        Self {
            kind,
            id,
            architecture,
        }
    }

    /// The catlet template gene of a geneset
    pub fn catlet(geneset: GeneSetIdentifier) -> Self {
        Self {
            kind: GeneKind::Catlet,
            id: GeneIdentifier {
                geneset,
                name: CATLET_GENE_NAME.to_string(),
            },
            architecture: Architecture::any(),
        }
    }

    /// Parse `kind::gene:organization/geneset/tag:name[architecture]`
    ///
    /// The `[architecture]` suffix is optional and defaults to `any`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (kind, rest) = s.split_once("::").ok_or_else(|| {
            Error::Validation(format!("unique gene identifier '{s}' is missing 'kind::'"))
        })?;

        let (gene, architecture) = match rest.strip_suffix(']') {
            Some(without) => {
                let (gene, arch) = without.rsplit_once('[').ok_or_else(|| {
                    Error::Validation(format!("unbalanced architecture brackets in '{s}'"))
                })?;
                (gene, Architecture::parse(arch)?)
            }
            None => (rest, Architecture::any()),
        };

        Ok(Self {
            kind: kind.parse()?,
            id: GeneIdentifier::parse(gene)?,
            architecture,
        })
    }

    pub fn kind(&self) -> GeneKind {
        self.kind
    }

    pub fn id(&self) -> &GeneIdentifier {
        &self.id
    }

    pub fn geneset(&self) -> &GeneSetIdentifier {
        self.id.geneset()
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// Same gene re-homed into another geneset (after following a reference)
    pub fn with_geneset(&self, geneset: GeneSetIdentifier) -> Self {
        Self {
            kind: self.kind,
            id: self.id.with_geneset(geneset),
            architecture: self.architecture.clone(),
        }
    }

    /// Same gene with the architecture that was actually matched
    pub fn with_architecture(&self, architecture: Architecture) -> Self {
        Self {
            kind: self.kind,
            id: self.id.clone(),
            architecture,
        }
    }

    /// Path of the merged content relative to the geneset directory
    pub fn artifact_path(&self) -> PathBuf {
        match self.kind {
            GeneKind::Catlet => PathBuf::from("catlet.yaml"),
            GeneKind::Fodder => PathBuf::from("fodder")
                .join(self.architecture.path_segment())
                .join(format!("{}.yaml", self.name())),
            GeneKind::Volume => PathBuf::from("volumes")
                .join(self.architecture.path_segment())
                .join(format!("{}.vhdx", self.name())),
        }
    }
}

impl fmt::Display for UniqueGeneIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}[{}]", self.kind, self.id, self.architecture)
    }
}

impl FromStr for UniqueGeneIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UniqueGeneIdentifier {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<UniqueGeneIdentifier> for String {
    fn from(id: UniqueGeneIdentifier) -> Self {
        id.to_string()
    }
}
