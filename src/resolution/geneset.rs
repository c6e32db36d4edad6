// src/resolution/geneset.rs

//! Geneset resolution
//!
//! Concrete genesets are served from the cache when present. References are
//! always re-checked against the repositories first because a tag such as
//! `latest` moves forward over time; the cached pointer is only used when no
//! repository can answer.

use super::{exhausted_error, GeneResolver, Lookup};
use crate::error::{Error, Result};
use crate::hash::GeneHash;
use crate::identity::{GeneSetIdentifier, UniqueGeneIdentifier};
use crate::manifest::GeneSetManifest;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl GeneResolver {
    /// Resolve a geneset to its terminal (non-reference) manifest
    pub async fn resolve_geneset(
        &self,
        id: &GeneSetIdentifier,
        cancel: &CancellationToken,
    ) -> Result<GeneSetManifest> {
        let mut chain = vec![id.to_string()];
        let mut visited = HashSet::from([id.clone()]);
        let mut current = id.clone();

        loop {
            let manifest = self.resolve_single_geneset(&current, cancel).await?;
            let Some(target) = manifest.reference.clone() else {
                return Ok(manifest);
            };

            chain.push(target.to_string());
            if !visited.insert(target.clone()) {
                return Err(Error::CircularReference(chain));
            }
            debug!("Geneset {} references {}", current, target);
            current = target;
        }
    }

    /// Resolve a gene identifier to the gene it names and its content hash
    ///
    /// The returned identifier is re-homed into the terminal geneset and
    /// carries the architecture that actually matched.
    pub async fn resolve_gene(
        &self,
        id: &UniqueGeneIdentifier,
        cancel: &CancellationToken,
    ) -> Result<(UniqueGeneIdentifier, GeneHash)> {
        let manifest = self.resolve_geneset(id.geneset(), cancel).await?;
        resolve_hash(id, &manifest)
    }

    async fn cached_geneset(&self, id: &GeneSetIdentifier) -> Result<Option<GeneSetManifest>> {
        let key = id.clone();
        match self.blocking(move |store| store.get_cached_geneset(&key)).await {
            Ok(manifest) => Ok(manifest),
            Err(e) if e.is_cache_miss() => {
                warn!("Ignoring cached manifest of {}: {}", id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve one link of a reference chain
    async fn resolve_single_geneset(
        &self,
        id: &GeneSetIdentifier,
        cancel: &CancellationToken,
    ) -> Result<GeneSetManifest> {
        let cached = self.cached_geneset(id).await?;
        if let Some(manifest) = &cached
            && !manifest.is_reference()
        {
            debug!("Geneset {} resolved from cache", id);
            return Ok(manifest.clone());
        }

        let subject = format!("geneset {id}");
        let lookup = self
            .query_repositories(&subject, cancel, |repository| async move {
                repository.fetch_geneset_manifest(id).await
            })
            .await?;

        match lookup {
            Lookup::Found { repository, value } => {
                info!("Fetched geneset {} from {}", id, repository.name());
                let manifest = value.clone();
                if let Err(e) = self.blocking(move |store| store.cache_geneset(&manifest)).await {
                    warn!("Failed to cache geneset {}: {}", id, e);
                }
                Ok(value)
            }
            Lookup::Exhausted { failures, errors } => match cached {
                Some(manifest) => {
                    warn!("No repository answered for {}; using cached manifest", id);
                    Ok(manifest)
                }
                None => Err(exhausted_error(&subject, failures, errors)),
            },
        }
    }
}

/// Look up the hash of a gene in a resolved manifest
pub(super) fn resolve_hash(
    id: &UniqueGeneIdentifier,
    manifest: &GeneSetManifest,
) -> Result<(UniqueGeneIdentifier, GeneHash)> {
    let (architecture, hash) = manifest
        .find_gene(id.kind(), id.name(), id.architecture())
        .ok_or_else(|| Error::GeneNotInSet {
            gene: id.to_string(),
            geneset: manifest.identifier.to_string(),
        })?;

    let resolved = id
        .with_geneset(manifest.identifier.clone())
        .with_architecture(architecture);
    debug!("Resolved {} to {} ({})", id, resolved, hash);
    Ok((resolved, hash))
}
