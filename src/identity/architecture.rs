// src/identity/architecture.rs

//! Gene architectures
//!
//! An architecture is `hypervisor/processor` (e.g. `hyperv/amd64`), a
//! hypervisor-only wildcard (`hyperv/any`) or the fully generic `any`.
//! When a gene is requested for a concrete architecture, the best available
//! entry is picked in this order: exact, same hypervisor with any processor,
//! then `any`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wildcard component
pub const ANY: &str = "any";

/// Hypervisor/processor architecture tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Architecture {
    hypervisor: String,
    processor: String,
}

impl Architecture {
    /// Create an architecture from its components
    pub fn new(hypervisor: &str, processor: &str) -> Result<Self> {
        let hypervisor = normalize(hypervisor)?;
        let processor = normalize(processor)?;

        if hypervisor == ANY && processor != ANY {
            return Err(Error::Validation(format!(
                "architecture 'any/{processor}' is not allowed; use 'any'"
            )));
        }

        Ok(Self {
            hypervisor,
            processor,
        })
    }

    /// The fully generic architecture
    pub fn any() -> Self {
        Self {
            hypervisor: ANY.to_string(),
            processor: ANY.to_string(),
        }
    }

    /// Parse `any`, `hypervisor/any` or `hypervisor/processor`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('/') {
            None if s.eq_ignore_ascii_case(ANY) => Ok(Self::any()),
            None => Err(Error::Validation(format!(
                "invalid architecture '{s}': expected 'any' or 'hypervisor/processor'"
            ))),
            Some((hypervisor, processor)) => Self::new(hypervisor, processor),
        }
    }

    pub fn hypervisor(&self) -> &str {
        &self.hypervisor
    }

    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Returns `true` for the fully generic `any`
    pub fn is_any(&self) -> bool {
        self.hypervisor == ANY
    }

    /// Candidate architectures in best-match order, without duplicates
    pub fn fallbacks(&self) -> Vec<Architecture> {
        let mut chain = vec![self.clone()];
        if self.processor != ANY {
            chain.push(Self {
                hypervisor: self.hypervisor.clone(),
                processor: ANY.to_string(),
            });
        }
        if !self.is_any() {
            chain.push(Self::any());
        }
        chain
    }

    /// Pick the best entry for `self` from `(architecture, value)` candidates
    pub fn best_match<'a, T, I>(&self, candidates: I) -> Option<(&'a Architecture, T)>
    where
        I: IntoIterator<Item = (&'a Architecture, T)>,
        T: Clone,
    {
        let candidates: Vec<(&'a Architecture, T)> = candidates.into_iter().collect();
        self.fallbacks().iter().find_map(|wanted| {
            candidates
                .iter()
                .find(|(arch, _)| *arch == wanted)
                .map(|(arch, value)| (*arch, value.clone()))
        })
    }

    /// Relative directory for content of this architecture
    pub fn path_segment(&self) -> String {
        if self.is_any() {
            ANY.to_string()
        } else {
            format!("{}/{}", self.hypervisor, self.processor)
        }
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Self::any()
    }
}

fn normalize(raw: &str) -> Result<String> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return Err(Error::Validation("empty architecture component".to_string()));
    }
    if !value.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(Error::Validation(format!(
            "invalid architecture component '{value}'"
        )));
    }
    Ok(value)
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "{ANY}")
        } else {
            write!(f, "{}/{}", self.hypervisor, self.processor)
        }
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Architecture {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch(s: &str) -> Architecture {
        Architecture::parse(s).unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert!(arch("any").is_any());
        assert!(arch("ANY").is_any());
        assert_eq!(arch("hyperv/amd64").hypervisor(), "hyperv");
        assert_eq!(arch("hyperv/amd64").processor(), "amd64");
        assert_eq!(arch("hyperv/any").to_string(), "hyperv/any");
        assert_eq!(arch("any/any").to_string(), "any");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Architecture::parse("").is_err());
        assert!(Architecture::parse("hyperv").is_err());
        assert!(Architecture::parse("any/amd64").is_err());
        assert!(Architecture::parse("hyper v/amd64").is_err());
    }

    #[test]
    fn test_fallbacks() {
        let chain = arch("hyperv/amd64").fallbacks();
        assert_eq!(chain, vec![arch("hyperv/amd64"), arch("hyperv/any"), arch("any")]);

        assert_eq!(arch("hyperv/any").fallbacks(), vec![arch("hyperv/any"), arch("any")]);
        assert_eq!(arch("any").fallbacks(), vec![arch("any")]);
    }

    #[test]
    fn test_best_match_prefers_exact() {
        let entries = [(arch("any"), 1), (arch("hyperv/any"), 2), (arch("hyperv/amd64"), 3)];
        let found = arch("hyperv/amd64").best_match(entries.iter().map(|(a, v)| (a, *v)));
        assert_eq!(found.map(|(_, v)| v), Some(3));
    }

    #[test]
    fn test_best_match_falls_back() {
        let entries = [(arch("any"), 1), (arch("hyperv/any"), 2)];
        let found = arch("hyperv/amd64").best_match(entries.iter().map(|(a, v)| (a, *v)));
        assert_eq!(found.map(|(_, v)| v), Some(2));

        let generic_only = [(arch("any"), 1)];
        let found = arch("hyperv/arm64").best_match(generic_only.iter().map(|(a, v)| (a, *v)));
        assert_eq!(found.map(|(_, v)| v), Some(1));
    }

    #[test]
    fn test_best_match_not_found() {
        let entries = [(arch("kvm/amd64"), 1)];
        let found = arch("hyperv/amd64").best_match(entries.iter().map(|(a, v)| (a, *v)));
        assert!(found.is_none());

        // A generic request never picks a specific entry
        let found = arch("any").best_match(entries.iter().map(|(a, v)| (a, *v)));
        assert!(found.is_none());
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(arch("any").path_segment(), "any");
        assert_eq!(arch("hyperv/amd64").path_segment(), "hyperv/amd64");
    }
}
