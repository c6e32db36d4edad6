// src/pool.rs

//! Caller-facing gene pool
//!
//! [`GenePool`] ties the local cache, the repositories, the request registry
//! and the background worker together. `request_gene` is deduplicated per
//! gene identity; the remaining operations go straight to the resolver or
//! the cache and are meant for read-only or offline callers.
//!
//! # Example
//!
//! ```ignore
//! let pool = GenePool::new(&GenePoolConfig::load(path)?)?;
//! let id = UniqueGeneIdentifier::parse("volume::gene:acme/os/1.0:sda[hyperv/amd64]")?;
//! let content = pool.request_gene(&id, None, None).await?;
//! println!("{}", content.path.display());
//! pool.shutdown().await;
//! ```

use crate::cache::{GeneContent, Ledger, LocalGenePool};
use crate::config::GenePoolConfig;
use crate::error::{Error, Result};
use crate::hash::GeneHash;
use crate::identity::{GeneSetIdentifier, UniqueGeneIdentifier};
use crate::manifest::GeneSetManifest;
use crate::progress::ProgressCallback;
use crate::registry::{JobSink, RequestRegistry};
use crate::repository::{GeneRepository, HttpGeneRepository};
use crate::resolution::{GeneResolver, ResolverOptions};
use crate::worker::GeneWorker;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct GenePool {
    resolver: GeneResolver,
    registry: Arc<RequestRegistry>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GenePool {
    /// Build a pool from configuration and start its worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &GenePoolConfig) -> Result<Self> {
        let options = config
            .resolver_options()
            .map_err(|e| Error::Config(format!("{e:#}")))?;

        let mut repositories: Vec<Arc<dyn GeneRepository>> = Vec::new();
        for section in &config.repositories {
            let url = section
                .base_url()
                .map_err(|e| Error::Config(format!("{e:#}")))?;
            let repository =
                HttpGeneRepository::new(&section.name, url, section.api_key.clone(), options.request_timeout)?;
            repositories.push(Arc::new(repository));
        }

        let store = LocalGenePool::new(config.cache_root())?;
        Self::with_repositories(store, repositories, options, config.worker.concurrency)
    }

    /// Build a pool over explicit repositories and start its worker
    pub fn with_repositories(
        store: LocalGenePool,
        repositories: Vec<Arc<dyn GeneRepository>>,
        options: ResolverOptions,
        concurrency: usize,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Init(format!("gene pool needs a Tokio runtime: {e}")))?;

        info!(
            "Opening gene pool at {} with {} repositories",
            store.root().display(),
            repositories.len()
        );

        let resolver = GeneResolver::new(store, repositories, options);
        let (jobs, queue) = mpsc::unbounded_channel();
        let sink: Arc<dyn JobSink> = Arc::new(jobs);
        let registry = Arc::new(RequestRegistry::new(sink));
        let cancel = CancellationToken::new();

        let worker = GeneWorker::new(resolver.clone(), registry.clone(), concurrency, cancel.clone());
        let handle = runtime.spawn(worker.run(queue));

        Ok(Self {
            resolver,
            registry,
            cancel,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Make a gene available locally, joining any in-flight fetch of it
    ///
    /// A known `hash` skips geneset resolution; the identifier is then taken
    /// as already resolved.
    pub async fn request_gene(
        &self,
        id: &UniqueGeneIdentifier,
        hash: Option<GeneHash>,
        progress: Option<ProgressCallback>,
    ) -> Result<GeneContent> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.registry.request(id, hash, progress).await
    }

    /// Resolve a geneset to its terminal manifest (not deduplicated)
    pub async fn resolve_geneset(&self, id: &GeneSetIdentifier) -> Result<GeneSetManifest> {
        self.resolver.resolve_geneset(id, &self.cancel).await
    }

    /// Resolve a gene to its re-homed identifier and content hash
    pub async fn resolve_gene(&self, id: &UniqueGeneIdentifier) -> Result<(UniqueGeneIdentifier, GeneHash)> {
        self.resolver.resolve_gene(id, &self.cancel).await
    }

    /// Look a gene up in the local cache only
    pub async fn get_cached_content(&self, id: &UniqueGeneIdentifier) -> Result<Option<GeneContent>> {
        let id = id.clone();
        self.resolver
            .blocking(move |store| store.get_cached_content(&id))
            .await
    }

    /// Drop a gene from the local cache
    pub async fn remove(&self, id: &UniqueGeneIdentifier) -> Result<bool> {
        let id = id.clone();
        self.resolver.blocking(move |store| store.remove(&id)).await
    }

    pub async fn list_cached_genesets(&self) -> Result<Vec<GeneSetIdentifier>> {
        self.resolver
            .blocking(|store| store.list_cached_genesets())
            .await
    }

    pub async fn ledger(&self, geneset: &GeneSetIdentifier) -> Result<Ledger> {
        let geneset = geneset.clone();
        self.resolver.blocking(move |store| store.ledger(&geneset)).await
    }

    pub fn store(&self) -> &LocalGenePool {
        self.resolver.store()
    }

    /// Requests that joined an in-flight fetch instead of starting one
    pub fn coalesced_count(&self) -> u64 {
        self.registry.coalesced_count()
    }

    /// Genes currently being fetched
    pub fn inflight_count(&self) -> usize {
        self.registry.inflight_count()
    }

    /// Stop the worker and fail every pending request with `Cancelled`
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            debug!("Gene worker ended abnormally: {}", e);
        }

        let failed = self.registry.fail_all(Error::Cancelled);
        info!("Gene pool shut down ({} pending requests cancelled)", failed);
    }
}

impl Drop for GenePool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
