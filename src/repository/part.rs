// src/repository/part.rs

//! Verified download of a single gene part
//!
//! Bytes are streamed through a SHA-1 hasher into `<part>.download`. The file
//! is renamed to its final name only after the digest matched, and removed on
//! mismatch, error or cancellation. A file under the final part name has
//! therefore always been verified once.

use super::client::GeneRepository;
use crate::error::{Error, Result};
use crate::hash::{GenePartHash, HashAlgorithm, Hasher};
use crate::manifest::GeneDownloadInfo;
use chrono::Utc;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default read-idle timeout for part transfers (60 seconds)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default minimum remaining URL validity before a transfer is attempted (5 minutes)
pub const DEFAULT_URL_EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Tunables for part downloads
#[derive(Debug, Clone, Copy)]
pub struct PartDownloadOptions {
    pub idle_timeout: Duration,
    pub url_expiry_margin: Duration,
}

impl Default for PartDownloadOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            url_expiry_margin: DEFAULT_URL_EXPIRY_MARGIN,
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".download");
    dest.with_file_name(name)
}

/// Download one part to `dest` and verify it
///
/// Fails with [`Error::UrlExpiring`] before any network call if the download
/// URLs expire within the configured margin. `on_bytes` is called with the
/// size of every chunk written. Returns the size of the part.
pub async fn download_part(
    repository: &dyn GeneRepository,
    info: &GeneDownloadInfo,
    part: &GenePartHash,
    dest: &Path,
    options: &PartDownloadOptions,
    cancel: &CancellationToken,
    on_bytes: &mut (dyn FnMut(u64) + Send),
) -> Result<u64> {
    let margin = chrono::Duration::from_std(options.url_expiry_margin)
        .unwrap_or_else(|_| chrono::Duration::minutes(5));
    if info.expires_within(margin, Utc::now()) {
        return Err(Error::UrlExpiring {
            expires: info.download_expires,
        });
    }

    let url = info.url_for(part).ok_or_else(|| {
        Error::transient(
            repository.name(),
            format!("no download URL for part {part}"),
        )
    })?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::storage(parent.display(), e))?;
    }

    let partial = partial_path(dest);
    match transfer(repository, url, part, &partial, options, cancel, on_bytes).await {
        Ok(size) => {
            fs::rename(&partial, dest)
                .await
                .map_err(|e| Error::storage(dest.display(), e))?;
            debug!("[{}] Downloaded part {} ({} bytes)", repository.name(), part, size);
            Ok(size)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn transfer(
    repository: &dyn GeneRepository,
    url: &url::Url,
    part: &GenePartHash,
    partial: &Path,
    options: &PartDownloadOptions,
    cancel: &CancellationToken,
    on_bytes: &mut (dyn FnMut(u64) + Send),
) -> Result<u64> {
    let idle = options.idle_timeout;
    let idle_error = || {
        Error::transient(
            repository.name(),
            format!("part {part} stalled for more than {}s", idle.as_secs()),
        )
    };

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        opened = tokio::time::timeout(idle, repository.open_part(url)) => {
            opened.map_err(|_| idle_error())??
        }
    };

    let mut file = fs::File::create(partial)
        .await
        .map_err(|e| Error::storage(partial.display(), e))?;
    let mut hasher = Hasher::new(HashAlgorithm::Sha1);
    let mut size = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = tokio::time::timeout(idle, stream.next()) => next.map_err(|_| idle_error())?,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::storage(partial.display(), e))?;
        size += chunk.len() as u64;
        on_bytes(chunk.len() as u64);
    }

    file.sync_all()
        .await
        .map_err(|e| Error::storage(partial.display(), e))?;

    let actual: GenePartHash = hasher.finalize_as();
    if &actual != part {
        warn!("[{}] Part {} failed verification (got {})", repository.name(), part, actual);
        return Err(Error::Integrity {
            subject: format!("part {part}"),
            expected: part.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(size)
}
