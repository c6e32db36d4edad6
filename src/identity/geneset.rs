// src/identity/geneset.rs

//! Geneset identifiers
//!
//! A geneset is addressed as `organization/geneset/tag`, for example
//! `acme/ubuntu/22.04`. The tag may be omitted on input and defaults to
//! `latest`. All parts are normalized to lowercase.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag used when none is given
pub const DEFAULT_TAG: &str = "latest";

/// Which naming rules apply to an identifier component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NamePart {
    Organization,
    GeneSet,
    Tag,
    Gene,
}

impl NamePart {
    fn label(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::GeneSet => "geneset",
            Self::Tag => "tag",
            Self::Gene => "gene name",
        }
    }

    fn length_range(self) -> (usize, usize) {
        match self {
            Self::Organization => (3, 40),
            Self::GeneSet | Self::Tag | Self::Gene => (1, 50),
        }
    }

    fn allows(self, c: char) -> bool {
        c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || c == '-'
            || (self == Self::Tag && c == '.')
    }
}

/// Normalize and validate a single identifier component
pub(crate) fn normalize_part(raw: &str, part: NamePart) -> Result<String> {
    let value = raw.trim().to_lowercase();
    let (min, max) = part.length_range();

    if value.is_empty() {
        return Err(Error::Validation(format!("empty {}", part.label())));
    }
    if value.len() < min || value.len() > max {
        return Err(Error::Validation(format!(
            "{} '{}' must be between {} and {} characters",
            part.label(),
            value,
            min,
            max
        )));
    }
    if let Some(c) = value.chars().find(|c| !part.allows(*c)) {
        return Err(Error::Validation(format!(
            "invalid character '{}' in {} '{}'",
            c,
            part.label(),
            value
        )));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(Error::Validation(format!(
            "{} '{}' must not start or end with '-'",
            part.label(),
            value
        )));
    }
    Ok(value)
}

/// Identifier of a versioned collection of genes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeneSetIdentifier {
    organization: String,
    geneset: String,
    tag: String,
}

impl GeneSetIdentifier {
    /// Create a new identifier, validating every component
    pub fn new(organization: &str, geneset: &str, tag: &str) -> Result<Self> {
        Ok(Self {
            organization: normalize_part(organization, NamePart::Organization)?,
            geneset: normalize_part(geneset, NamePart::GeneSet)?,
            tag: normalize_part(tag, NamePart::Tag)?,
        })
    }

    /// Parse `organization/geneset[/tag]`
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [org, set] => Self::new(org, set, DEFAULT_TAG),
            [org, set, tag] => Self::new(org, set, tag),
            _ => Err(Error::Validation(format!(
                "invalid geneset identifier '{s}': expected organization/geneset[/tag]"
            ))),
        }
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn geneset(&self) -> &str {
        &self.geneset
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Same organization and geneset with a different tag
    pub fn with_tag(&self, tag: &str) -> Result<Self> {
        Ok(Self {
            organization: self.organization.clone(),
            geneset: self.geneset.clone(),
            tag: normalize_part(tag, NamePart::Tag)?,
        })
    }
}

impl fmt::Display for GeneSetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.geneset, self.tag)
    }
}

impl FromStr for GeneSetIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GeneSetIdentifier {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<GeneSetIdentifier> for String {
    fn from(id: GeneSetIdentifier) -> Self {
        id.to_string()
    }
}
