// src/resolution/gene.rs

//! Providing a single gene
//!
//! `provide` drives an explicit state machine:
//!
//! ```text
//! ResolveGeneSet -> ResolveHash -> EnsureParts -> Merge -> Done
//! ```
//!
//! Any state may fail. When the caller already knows the content hash the
//! machine starts at `EnsureParts` with the identifier taken as resolved.
//!
//! Before touching the download directory of a hash, `EnsureParts` takes
//! the store's transfer lock for it and keeps it through `Merge`. Once the
//! lock is held the cache is checked again: another gene with the same hash
//! may have been merged meanwhile, and its content is copied instead of
//! downloaded.

use super::geneset::resolve_hash;
use super::{exhausted_error, pause, GeneResolver, Lookup};
use crate::cache::{GeneContent, TransferGuard};
use crate::error::{Error, Result};
use crate::hash::{GeneHash, GenePartHash};
use crate::identity::UniqueGeneIdentifier;
use crate::manifest::{GeneDownloadInfo, GeneManifest, GeneSetManifest};
use crate::progress::{GeneProgress, ProgressCallback, ThrottledProgress};
use crate::repository::{download_part, GeneRepository};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Merges attempted before a content mismatch is reported
const MAX_MERGE_ATTEMPTS: u32 = 2;

enum State {
    ResolveGeneSet,
    ResolveHash(GeneSetManifest),
    EnsureParts(UniqueGeneIdentifier, GeneHash),
    Merge(UniqueGeneIdentifier, GeneHash),
    Done(GeneContent),
}

/// Download URLs together with the repository that issued them
type Source = (Arc<dyn GeneRepository>, GeneDownloadInfo);

impl GeneResolver {
    /// Make a gene available in the local cache and return its content
    pub async fn provide(
        &self,
        id: &UniqueGeneIdentifier,
        hash: Option<GeneHash>,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<GeneContent> {
        let mut state = match hash {
            Some(hash) => State::EnsureParts(id.clone(), hash),
            None => State::ResolveGeneSet,
        };
        let mut merge_attempts = 0;
        let mut transfer: Option<TransferGuard> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            state = match state {
                State::ResolveGeneSet => State::ResolveHash(self.resolve_geneset(id.geneset(), cancel).await?),
                State::ResolveHash(manifest) => {
                    let (resolved, hash) = resolve_hash(id, &manifest)?;
                    State::EnsureParts(resolved, hash)
                }
                State::EnsureParts(id, hash) => {
                    if let Some(content) = self.cached_content(&id, &hash).await? {
                        debug!("{} already cached", id);
                        State::Done(content)
                    } else if transfer.is_none() {
                        transfer = Some(self.lock_transfer(&id, &hash, cancel).await?);
                        State::EnsureParts(id, hash)
                    } else if let Some(content) = self.sibling_content(&id, &hash).await {
                        State::Done(content)
                    } else {
                        self.ensure_parts(&id, &hash, progress.clone(), cancel).await?;
                        State::Merge(id, hash)
                    }
                }
                State::Merge(id, hash) => {
                    merge_attempts += 1;
                    let (key, gene) = (id.clone(), hash.clone());
                    match self.blocking(move |store| store.merge(&key, &gene)).await {
                        Ok(content) => State::Done(content),
                        Err(e @ Error::Integrity { .. }) if merge_attempts < MAX_MERGE_ATTEMPTS => {
                            warn!("{}; downloading {} again", e, id);
                            State::EnsureParts(id, hash)
                        }
                        Err(e) => return Err(e),
                    }
                }
                State::Done(content) => return Ok(content),
            };
        }
    }

    async fn cached_content(&self, id: &UniqueGeneIdentifier, hash: &GeneHash) -> Result<Option<GeneContent>> {
        let (key, gene) = (id.clone(), hash.clone());
        match self.blocking(move |store| store.get_content(&key, &gene)).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_cache_miss() => {
                warn!("Treating {} as not cached: {}", id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn lock_transfer(
        &self,
        id: &UniqueGeneIdentifier,
        hash: &GeneHash,
        cancel: &CancellationToken,
    ) -> Result<TransferGuard> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            guard = self.store.lock_transfer(id.geneset(), hash) => Ok(guard),
        }
    }

    /// Content of another gene of the same geneset sharing `hash`
    async fn sibling_content(&self, id: &UniqueGeneIdentifier, hash: &GeneHash) -> Option<GeneContent> {
        let (key, gene) = (id.clone(), hash.clone());
        match self.blocking(move |store| store.copy_from_sibling(&key, &gene)).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot reuse cached content for {}: {}", id, e);
                None
            }
        }
    }

    /// Gene manifest left behind by an earlier, interrupted download
    async fn saved_gene_manifest(&self, id: &UniqueGeneIdentifier, hash: &GeneHash) -> Option<GeneManifest> {
        let (geneset, gene) = (id.geneset().clone(), hash.clone());
        match self
            .blocking(move |store| store.cached_gene_manifest(&geneset, &gene))
            .await
        {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!("No usable saved manifest for {}: {}", hash, e);
                None
            }
        }
    }

    /// Fetch fresh download URLs and persist the gene manifest
    async fn fetch_source(
        &self,
        id: &UniqueGeneIdentifier,
        hash: &GeneHash,
        cancel: &CancellationToken,
    ) -> Result<Source> {
        let subject = format!("gene {hash} of {}", id.geneset());
        let geneset = id.geneset();
        let lookup = self
            .query_repositories(&subject, cancel, |repository| async move {
                repository.fetch_gene_manifest(geneset, hash).await
            })
            .await?;

        let (repository, info) = match lookup {
            Lookup::Found { repository, value } => (repository, value),
            Lookup::Exhausted { failures, errors } => {
                return Err(exhausted_error(&subject, failures, errors));
            }
        };

        let (geneset, manifest) = (id.geneset().clone(), info.manifest.clone());
        self.blocking(move |store| store.save_gene_manifest(&geneset, &manifest))
            .await?;
        Ok((repository, info))
    }

    /// Download every missing part of a gene, in bounded rounds
    async fn ensure_parts(
        &self,
        id: &UniqueGeneIdentifier,
        hash: &GeneHash,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut source: Option<Source> = None;
        let mut manifest = match self.saved_gene_manifest(id, hash).await {
            Some(manifest) => manifest,
            None => {
                let fetched = self.fetch_source(id, hash, cancel).await?;
                let manifest = fetched.1.manifest.clone();
                source = Some(fetched);
                manifest
            }
        };

        let callback: ProgressCallback = progress.unwrap_or_else(|| Arc::new(|_: GeneProgress| {}));
        let tracker = ThrottledProgress::new(manifest.size, self.options.progress_interval, callback);
        let mut missing = self.missing_parts(id, hash, &manifest, &tracker).await?;

        let retry = self.options.retry;
        let mut round = 0;
        while !missing.is_empty() && round < retry.rounds {
            round += 1;

            let (repository, info) = match source.take() {
                Some(source) => source,
                None => match self.fetch_source(id, hash, cancel).await {
                    Ok(fresh) => fresh,
                    Err(e) if !e.is_transient() => return Err(e),
                    Err(e) => {
                        warn!("Round {}/{} for {}: {}", round, retry.rounds, id, e);
                        if round < retry.rounds {
                            pause(retry.delay, cancel).await?;
                        }
                        continue;
                    }
                },
            };

            if info.manifest != manifest {
                info!("Gene manifest of {} changed; restarting download", hash);
                manifest = info.manifest.clone();
                tracker.set_total(manifest.size);
                missing = self.missing_parts(id, hash, &manifest, &tracker).await?;
            }

            debug!(
                "Round {}/{}: {} of {} parts of {} missing",
                round,
                retry.rounds,
                missing.len(),
                manifest.parts.len(),
                id
            );

            let mut expired = false;
            let mut completed = HashSet::new();
            for part in &missing {
                let dest = self.store.part_path(id.geneset(), hash, part);
                let mut on_bytes = |n: u64| tracker.increment(n);
                match download_part(
                    repository.as_ref(),
                    &info,
                    part,
                    &dest,
                    &self.options.part,
                    cancel,
                    &mut on_bytes,
                )
                .await
                {
                    Ok(_) => {
                        completed.insert(part.clone());
                    }
                    Err(Error::UrlExpiring { expires }) => {
                        debug!("Download URLs for {} expire at {}; refreshing", hash, expires);
                        expired = true;
                        break;
                    }
                    Err(e @ Error::Integrity { .. }) => {
                        warn!("[{}] {}", repository.name(), e);
                    }
                    Err(e) if e.is_transient() => {
                        warn!("[{}] Round {}/{} for {}: {}", repository.name(), round, retry.rounds, id, e);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            missing.retain(|part| !completed.contains(part));

            if !missing.is_empty() && round < retry.rounds && !expired {
                pause(retry.delay, cancel).await?;
            }
        }

        if !missing.is_empty() {
            return Err(Error::IncompleteTransfer {
                gene: id.to_string(),
                missing: missing.len(),
                total: manifest.parts.len(),
            });
        }

        tracker.finish();
        Ok(())
    }

    /// Parts still to download, in manifest order
    ///
    /// Verified parts already on disk count towards progress.
    async fn missing_parts(
        &self,
        id: &UniqueGeneIdentifier,
        hash: &GeneHash,
        manifest: &GeneManifest,
        tracker: &ThrottledProgress,
    ) -> Result<Vec<GenePartHash>> {
        let (key, gene) = (id.clone(), hash.clone());
        let downloaded = self
            .blocking(move |store| store.get_downloaded_parts(&key, &gene))
            .await?;

        tracker.set_position(downloaded.values().sum());
        if !downloaded.is_empty() {
            info!(
                "Resuming {}: {} of {} parts already downloaded",
                id,
                downloaded.len(),
                manifest.parts.len()
            );
        }

        Ok(manifest
            .parts
            .iter()
            .filter(|part| !downloaded.contains_key(part))
            .cloned()
            .collect())
    }
}
