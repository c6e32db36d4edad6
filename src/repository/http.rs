// src/repository/http.rs

//! HTTP genepool repository using reqwest

use super::client::{GeneRepository, PartStream};
use super::wire::{GeneDownloadResponse, GeneSetResponse};
use crate::error::{Error, Result};
use crate::hash::GeneHash;
use crate::identity::GeneSetIdentifier;
use crate::manifest::{GeneDownloadInfo, GeneSetManifest};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default timeout for manifest requests (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body echoed into an error message
const MAX_ERROR_BODY: usize = 256;

/// Map a non-success HTTP status to the repository error taxonomy
///
/// Returns `None` for 404, which callers treat as "not found here".
pub fn classify_status(repository: &str, status: u16, body: &str) -> Option<Error> {
    let message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    match status {
        404 => None,
        400..=499 => Some(Error::ClientError {
            repository: repository.to_string(),
            status,
            message,
        }),
        _ => Some(Error::transient(
            repository,
            if message.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {message}")
            },
        )),
    }
}

/// A genepool reachable over HTTP(S)
pub struct HttpGeneRepository {
    name: String,
    base_url: Url,
    client: Client,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl HttpGeneRepository {
    /// Create a repository client for `base_url`
    pub fn new(name: &str, base_url: Url, api_key: Option<String>, request_timeout: Duration) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "repository '{name}' URL cannot be used as a base: {base_url}"
            )));
        }

        let client = Client::builder()
            .user_agent(concat!("genepool/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| Error::Init(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            base_url,
            client,
            api_key,
            request_timeout,
        })
    }

    /// Build `{base}/v1/<segments...>`, escaping each segment
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    fn transient(&self, message: impl Into<String>) -> Error {
        Error::transient(&self.name, message)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        debug!("[{}] GET {}", self.name, url);

        let mut request = self.client.get(url.clone()).timeout(self.request_timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transient(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return match classify_status(&self.name, status.as_u16(), &body) {
                None => Ok(None),
                Some(err) => Err(err),
            };
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transient(format!("failed to read response from {url}: {e}")))?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| self.transient(format!("invalid response from {url}: {e}")))
    }
}

#[async_trait]
impl GeneRepository for HttpGeneRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_geneset_manifest(&self, id: &GeneSetIdentifier) -> Result<Option<GeneSetManifest>> {
        let url = self.endpoint(&["genesets", id.organization(), id.geneset(), id.tag()])?;
        let Some(response) = self.get_json::<GeneSetResponse>(url).await? else {
            return Ok(None);
        };

        let manifest = GeneSetManifest::try_from(response)
            .map_err(|e| self.transient(format!("invalid manifest for {id}: {e}")))?;
        if &manifest.identifier != id {
            return Err(self.transient(format!(
                "asked for {id} but received {}",
                manifest.identifier
            )));
        }
        Ok(Some(manifest))
    }

    async fn fetch_gene_manifest(
        &self,
        geneset: &GeneSetIdentifier,
        hash: &GeneHash,
    ) -> Result<Option<GeneDownloadInfo>> {
        let gene = hash.to_string();
        let url = self.endpoint(&[
            "genes",
            geneset.organization(),
            geneset.geneset(),
            geneset.tag(),
            &gene,
        ])?;
        let Some(response) = self.get_json::<GeneDownloadResponse>(url).await? else {
            return Ok(None);
        };

        let info = GeneDownloadInfo::try_from(response)
            .map_err(|e| self.transient(format!("invalid gene manifest for {hash}: {e}")))?;
        if &info.manifest.gene != hash {
            return Err(self.transient(format!(
                "asked for {hash} but received {}",
                info.manifest.gene
            )));
        }
        Ok(Some(info))
    }

    async fn open_part(&self, url: &Url) -> Result<PartStream> {
        // Part URLs are pre-signed; no credentials and no overall timeout
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transient(format!("part request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(self.transient(format!("part download returned HTTP {status}")));
        }

        let name = self.name.clone();
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| Error::transient(&name, format!("part stream failed: {e}"))));
        Ok(Box::pin(stream))
    }
}
