// src/repository/wire.rs

//! JSON bodies of the genepool repository API
//!
//! `GET {base}/v1/genesets/{org}/{geneset}/{tag}`:
//!
//! ```json
//! {
//!   "geneset": "acme/ubuntu/latest",
//!   "ref": "acme/ubuntu/22.04",
//!   "manifest": null
//! }
//! ```
//!
//! or, for a concrete geneset, `"ref": null` and
//!
//! ```json
//! "manifest": {
//!   "catlet": "sha256:...",
//!   "fodder": [{ "name": "setup", "architecture": "any", "hash": "sha256:..." }],
//!   "volumes": [{ "name": "sda", "architecture": "hyperv/amd64", "hash": "sha256:..." }]
//! }
//! ```
//!
//! `GET {base}/v1/genes/{org}/{geneset}/{tag}/{gene hash}`:
//!
//! ```json
//! {
//!   "gene": "sha256:...",
//!   "manifest": { "format": "gzip", "size": 1024, "original_size": 4096, "parts": ["sha1:..."] },
//!   "download_uris": [{ "part": "sha1:...", "uri": "https://..." }],
//!   "download_expires": "2026-01-01T12:00:00Z"
//! }
//! ```

use crate::compression::CompressionFormat;
use crate::error::{Error, Result};
use crate::hash::{GeneHash, GenePartHash};
use crate::identity::{Architecture, GeneSetIdentifier};
use crate::manifest::{GeneDownloadInfo, GeneManifest, GeneReference, GeneSetManifest, PartDownload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneSetResponse {
    pub geneset: String,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub manifest: Option<GeneSetBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneSetBody {
    #[serde(default)]
    pub catlet: Option<String>,
    #[serde(default)]
    pub fodder: Vec<GeneEntry>,
    #[serde(default)]
    pub volumes: Vec<GeneEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneEntry {
    pub name: String,
    #[serde(default)]
    pub architecture: Option<String>,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneDownloadResponse {
    pub gene: String,
    pub manifest: GeneBody,
    #[serde(default)]
    pub download_uris: Vec<PartUri>,
    pub download_expires: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneBody {
    #[serde(default)]
    pub format: Option<String>,
    pub size: u64,
    pub original_size: u64,
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartUri {
    pub part: String,
    pub uri: String,
}

fn entries(entries: Vec<GeneEntry>) -> Result<Vec<GeneReference>> {
    entries
        .into_iter()
        .map(|entry| {
            Ok(GeneReference {
                name: entry.name,
                architecture: match entry.architecture.as_deref() {
                    Some(arch) if !arch.is_empty() => Architecture::parse(arch)?,
                    _ => Architecture::any(),
                },
                hash: GeneHash::parse(&entry.hash)?,
            })
        })
        .collect()
}

impl TryFrom<GeneSetResponse> for GeneSetManifest {
    type Error = Error;

    fn try_from(response: GeneSetResponse) -> Result<Self> {
        let identifier = GeneSetIdentifier::parse(&response.geneset)?;

        let manifest = match response.reference.filter(|r| !r.is_empty()) {
            Some(target) => GeneSetManifest::reference(identifier, GeneSetIdentifier::parse(&target)?),
            None => {
                let body = response.manifest.unwrap_or_default();
                GeneSetManifest {
                    identifier,
                    reference: None,
                    catlet: body.catlet.as_deref().map(GeneHash::parse).transpose()?,
                    fodder: entries(body.fodder)?,
                    volumes: entries(body.volumes)?,
                }
            }
        };

        manifest.validate()?;
        Ok(manifest)
    }
}

impl TryFrom<GeneDownloadResponse> for GeneDownloadInfo {
    type Error = Error;

    fn try_from(response: GeneDownloadResponse) -> Result<Self> {
        let format = match response.manifest.format.as_deref() {
            Some(name) => CompressionFormat::from_name(name)?,
            None => CompressionFormat::None,
        };

        let manifest = GeneManifest {
            gene: GeneHash::parse(&response.gene)?,
            format,
            size: response.manifest.size,
            original_size: response.manifest.original_size,
            parts: response
                .manifest
                .parts
                .iter()
                .map(|p| GenePartHash::parse(p))
                .collect::<Result<_>>()?,
        };

        let parts = response
            .download_uris
            .into_iter()
            .map(|uri| {
                Ok(PartDownload {
                    part: GenePartHash::parse(&uri.part)?,
                    url: Url::parse(&uri.uri)
                        .map_err(|e| Error::Validation(format!("invalid part URL '{}': {e}", uri.uri)))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let info = GeneDownloadInfo {
            manifest,
            parts,
            download_expires: response.download_expires,
        };
        info.validate()?;
        Ok(info)
    }
}
