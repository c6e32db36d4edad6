// src/cache/ledger.rs

//! The per-geneset ledger (`genes.json`)
//!
//! The ledger is the only record of which gene hashes have been fully merged.
//! Content files without a ledger entry are never served. Every write goes to a
//! temp file that is fsynced and renamed over the old ledger.

use super::{read_json, write_atomic};
use crate::error::Result;
use crate::hash::GeneHash;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Set of merged gene hashes of one geneset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    hashes: BTreeSet<GeneHash>,
}

impl Ledger {
    /// Load the ledger at `path`; a missing file is an empty ledger
    pub fn load(path: &Path) -> Result<Self> {
        let hashes: Vec<GeneHash> = read_json(path)?.unwrap_or_default();
        Ok(Self {
            hashes: hashes.into_iter().collect(),
        })
    }

    /// Write the ledger durably
    pub fn save(&self, path: &Path) -> Result<()> {
        let hashes: Vec<&GeneHash> = self.hashes.iter().collect();
        write_atomic(path, &serde_json::to_vec_pretty(&hashes)?)?;
        debug!("Wrote ledger {} ({} entries)", path.display(), self.hashes.len());
        Ok(())
    }

    pub fn contains(&self, hash: &GeneHash) -> bool {
        self.hashes.contains(hash)
    }

    /// Returns `true` if the entry was newly added
    pub fn insert(&mut self, hash: GeneHash) -> bool {
        self.hashes.insert(hash)
    }

    /// Returns `true` if the entry was present
    pub fn remove(&mut self, hash: &GeneHash) -> bool {
        self.hashes.remove(hash)
    }

    /// Keep only entries for which `keep` returns `true`; returns the dropped entries
    pub fn retain(&mut self, mut keep: impl FnMut(&GeneHash) -> bool) -> Vec<GeneHash> {
        let dropped: Vec<GeneHash> = self.hashes.iter().filter(|h| !keep(h)).cloned().collect();
        for hash in &dropped {
            self.hashes.remove(hash);
        }
        dropped
    }

    pub fn hashes(&self) -> impl Iterator<Item = &GeneHash> {
        self.hashes.iter()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
