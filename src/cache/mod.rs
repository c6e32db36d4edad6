// src/cache/mod.rs

//! Local gene cache
//!
//! Durable storage of geneset manifests and merged gene content under a cache
//! root. See [`layout`] for the directory structure and [`ledger`] for the
//! record that decides whether content is ready to read.

pub mod layout;
pub mod ledger;
mod store;

pub use layout::CacheLayout;
pub use ledger::Ledger;
pub use store::{GeneContent, LocalGenePool, TransferGuard};

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Write `data` to `path` via a synced temp file and rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::storage(parent.display(), e))?;
    }

    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    let temp_path = path.with_file_name(name);

    let mut file = fs::File::create(&temp_path).map_err(|e| Error::storage(temp_path.display(), e))?;
    file.write_all(data).map_err(|e| Error::storage(temp_path.display(), e))?;
    file.sync_all().map_err(|e| Error::storage(temp_path.display(), e))?;
    fs::rename(&temp_path, path).map_err(|e| Error::storage(path.display(), e))?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Read a JSON document; `None` if the file does not exist
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage(path.display(), e)),
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| Error::Corruption {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}
