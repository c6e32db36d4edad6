// src/repository/client.rs

//! Repository abstraction
//!
//! A [`GeneRepository`] is one remote genepool. The resolver talks to an
//! ordered list of them and decides what to do with each answer:
//!
//! - `Ok(Some(_))`: found
//! - `Ok(None)`: this repository does not know the resource, try the next one
//! - `Err(Error::ClientError { .. })`: request rejected, abort the whole search
//! - `Err(Error::Transient { .. })`: server or transport failure, try the next one

use crate::error::Result;
use crate::hash::GeneHash;
use crate::identity::GeneSetIdentifier;
use crate::manifest::{GeneDownloadInfo, GeneSetManifest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use url::Url;

/// Body of a part download, yielded in arbitrary-sized chunks
pub type PartStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One remote genepool
#[async_trait]
pub trait GeneRepository: Send + Sync {
    /// Name used in logs and aggregated errors
    fn name(&self) -> &str;

    /// Fetch the manifest of a geneset
    async fn fetch_geneset_manifest(&self, id: &GeneSetIdentifier) -> Result<Option<GeneSetManifest>>;

    /// Fetch the manifest of a gene together with fresh part download URLs
    async fn fetch_gene_manifest(
        &self,
        geneset: &GeneSetIdentifier,
        hash: &GeneHash,
    ) -> Result<Option<GeneDownloadInfo>>;

    /// Open the body of one part download URL
    ///
    /// Hash verification and timeouts are applied by the caller.
    async fn open_part(&self, url: &Url) -> Result<PartStream>;
}
