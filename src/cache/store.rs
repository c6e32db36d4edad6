// src/cache/store.rs

//! Local gene pool storage
//!
//! `LocalGenePool` is synchronous and cheap to clone. Readers never take a
//! lock; ledger read-modify-write cycles and manifest writes are serialized
//! per geneset.
//!
//! Several gene identifiers may share one content hash, and with it the
//! `.tmp/<hash>` download directory. A transfer of that directory, from
//! saving the gene manifest through the merge, runs under the lock returned
//! by [`LocalGenePool::lock_transfer`].

use super::layout::CacheLayout;
use super::ledger::Ledger;
use super::{read_json, write_atomic};
use crate::compression::{self, concat_readers};
use crate::error::{Error, Result};
use crate::hash::{GeneHash, GenePartHash, HashAlgorithm, Hasher};
use crate::identity::{GeneSetIdentifier, UniqueGeneIdentifier};
use crate::manifest::{GeneManifest, GeneSetManifest};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

type TransferKey = (GeneSetIdentifier, GeneHash);
type TransferLocks = DashMap<TransferKey, Arc<AsyncMutex<()>>>;

/// Merged gene content available on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneContent {
    /// Identifier re-homed to the geneset that actually holds the gene
    pub id: UniqueGeneIdentifier,
    pub hash: GeneHash,
    pub path: PathBuf,
    pub size: u64,
}

/// Exclusive use of the download directory of one gene hash
///
/// The lock entry is dropped from the table once nobody holds or awaits it.
pub struct TransferGuard {
    key: TransferKey,
    locks: Arc<TransferLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// On-disk gene cache rooted at one directory
#[derive(Clone)]
pub struct LocalGenePool {
    layout: CacheLayout,
    write_locks: Arc<DashMap<GeneSetIdentifier, Arc<Mutex<()>>>>,
    transfer_locks: Arc<TransferLocks>,
}

impl LocalGenePool {
    /// Open (and create if needed) a cache rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| Error::storage(root.display(), e))?;
            debug!("Created gene cache root: {}", root.display());
        }

        Ok(Self {
            layout: CacheLayout::new(root),
            write_locks: Arc::new(DashMap::new()),
            transfer_locks: Arc::new(DashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    fn write_lock(&self, geneset: &GeneSetIdentifier) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(geneset.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive use of the download directory of `hash` in `geneset`
    pub async fn lock_transfer(&self, geneset: &GeneSetIdentifier, hash: &GeneHash) -> TransferGuard {
        let key = (geneset.clone(), hash.clone());
        let lock = self
            .transfer_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        TransferGuard {
            key,
            locks: self.transfer_locks.clone(),
            guard: Some(guard),
        }
    }

    /// Transfers currently holding or awaiting a lock
    pub fn active_transfers(&self) -> usize {
        self.transfer_locks.len()
    }

    /// Apply `update` to the ledger of `geneset` under its write lock
    ///
    /// The ledger is only written when `update` returns `true`.
    fn update_ledger<T>(
        &self,
        geneset: &GeneSetIdentifier,
        update: impl FnOnce(&mut Ledger) -> (bool, T),
    ) -> Result<T> {
        let lock = self.write_lock(geneset);
        let _guard = lock.lock();

        let path = self.layout.ledger(geneset);
        let mut ledger = match Ledger::load(&path) {
            Ok(ledger) => ledger,
            Err(e) if matches!(e, Error::Corruption { .. }) => {
                warn!("Discarding corrupt ledger {}: {}", path.display(), e);
                Ledger::default()
            }
            Err(e) => return Err(e),
        };

        let (changed, result) = update(&mut ledger);
        if changed {
            ledger.save(&path)?;
        }
        Ok(result)
    }

    /// Read the ledger of a geneset
    pub fn ledger(&self, geneset: &GeneSetIdentifier) -> Result<Ledger> {
        Ledger::load(&self.layout.ledger(geneset))
    }

    // -- Geneset manifests ---------------------------------------------------

    /// Cached manifest of a geneset, if any
    pub fn get_cached_geneset(&self, id: &GeneSetIdentifier) -> Result<Option<GeneSetManifest>> {
        let path = self.layout.geneset_manifest(id);
        let Some(manifest) = read_json::<GeneSetManifest>(&path)? else {
            return Ok(None);
        };

        if &manifest.identifier != id {
            return Err(Error::Corruption {
                path: path.display().to_string(),
                message: format!("manifest is for {}, expected {}", manifest.identifier, id),
            });
        }
        Ok(Some(manifest))
    }

    /// Store a geneset manifest
    ///
    /// Ledger entries for hashes a concrete manifest no longer lists are
    /// dropped, so content from a previous revision of the tag is not served.
    pub fn cache_geneset(&self, manifest: &GeneSetManifest) -> Result<()> {
        let id = &manifest.identifier;
        let data = serde_json::to_vec_pretty(manifest)?;
        {
            let lock = self.write_lock(id);
            let _guard = lock.lock();
            write_atomic(&self.layout.geneset_manifest(id), &data)?;
        }
        debug!("Cached geneset manifest {}", id);

        if manifest.is_reference() {
            return Ok(());
        }

        let listed = manifest.hashes();
        let dropped = self.update_ledger(id, |ledger| {
            let dropped = ledger.retain(|hash| listed.contains(hash));
            (!dropped.is_empty(), dropped)
        })?;
        for hash in dropped {
            info!("Invalidated {} in {}: no longer listed by its geneset", hash, id);
        }
        Ok(())
    }

    /// Follow cached reference manifests to the terminal geneset
    ///
    /// Returns `None` if any manifest along the chain is not cached.
    pub fn resolve_cached_geneset(&self, id: &GeneSetIdentifier) -> Result<Option<GeneSetManifest>> {
        let mut chain = vec![id.to_string()];
        let mut visited = HashSet::from([id.clone()]);
        let mut current = id.clone();

        loop {
            let Some(manifest) = self.get_cached_geneset(&current)? else {
                return Ok(None);
            };
            let Some(target) = manifest.reference.clone() else {
                return Ok(Some(manifest));
            };

            chain.push(target.to_string());
            if !visited.insert(target.clone()) {
                return Err(Error::CircularReference(chain));
            }
            current = target;
        }
    }

    /// Every geneset with a cached manifest
    pub fn list_cached_genesets(&self) -> Result<Vec<GeneSetIdentifier>> {
        let mut genesets = Vec::new();
        for org in subdirs(self.layout.root())? {
            for set in subdirs(&org)? {
                for tag in subdirs(&set)? {
                    if !tag.join(super::layout::GENESET_MANIFEST_FILE).is_file() {
                        continue;
                    }
                    let (Some(o), Some(s), Some(t)) = (file_name(&org), file_name(&set), file_name(&tag))
                    else {
                        continue;
                    };
                    match GeneSetIdentifier::new(o, s, t) {
                        Ok(id) => genesets.push(id),
                        Err(e) => debug!("Skipping {}: {}", tag.display(), e),
                    }
                }
            }
        }
        genesets.sort();
        Ok(genesets)
    }

    // -- Gene content --------------------------------------------------------

    /// Merged content of `id` if `hash` is in the ledger and the file exists
    ///
    /// A ledger entry without its file is reported as absent so the caller
    /// re-fetches; the next merge repairs the entry.
    pub fn get_content(&self, id: &UniqueGeneIdentifier, hash: &GeneHash) -> Result<Option<GeneContent>> {
        if !self.ledger(id.geneset())?.contains(hash) {
            return Ok(None);
        }

        let path = self.layout.content(id);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(GeneContent {
                id: id.clone(),
                hash: hash.clone(),
                path,
                size: meta.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Ledger lists {} for {} but {} is missing", hash, id, path.display());
                Ok(None)
            }
            Err(e) => Err(Error::storage(path.display(), e)),
        }
    }

    /// Provide `id` from the merged content of another gene with the same hash
    ///
    /// The sibling's file is copied and verified against `hash`. Returns
    /// `None` if the ledger does not list `hash` or no sibling file is usable.
    pub fn copy_from_sibling(&self, id: &UniqueGeneIdentifier, hash: &GeneHash) -> Result<Option<GeneContent>> {
        let geneset = id.geneset();
        if !self.ledger(geneset)?.contains(hash) {
            return Ok(None);
        }
        let Some(manifest) = self.get_cached_geneset(geneset)? else {
            return Ok(None);
        };

        let dest = self.layout.content(id);
        for (sibling, sibling_hash) in manifest.genes()? {
            if &sibling_hash != hash || &sibling == id {
                continue;
            }
            let source = self.layout.content(&sibling);
            if !source.is_file() {
                continue;
            }

            match copy_verified(&source, &dest, hash) {
                Ok(size) => {
                    info!("Copied {} from {} ({} bytes)", id, sibling, size);
                    return Ok(Some(GeneContent {
                        id: id.clone(),
                        hash: hash.clone(),
                        path: dest,
                        size,
                    }));
                }
                Err(e) => warn!("Cannot copy {} from {}: {}", id, sibling, e),
            }
        }
        Ok(None)
    }

    /// Merged content of a gene using only cached manifests
    ///
    /// Follows cached references and applies architecture fallback.
    pub fn get_cached_content(&self, id: &UniqueGeneIdentifier) -> Result<Option<GeneContent>> {
        let Some(manifest) = self.resolve_cached_geneset(id.geneset())? else {
            return Ok(None);
        };
        let Some((architecture, hash)) = manifest.find_gene(id.kind(), id.name(), id.architecture())
        else {
            return Ok(None);
        };

        let resolved = id
            .with_geneset(manifest.identifier.clone())
            .with_architecture(architecture);
        self.get_content(&resolved, &hash)
    }

    /// Remove a gene's ledger entry and content file
    ///
    /// Returns `true` if anything was removed.
    pub fn remove(&self, id: &UniqueGeneIdentifier) -> Result<bool> {
        let (target, hash) = match self.resolve_cached_geneset(id.geneset())? {
            Some(manifest) => match manifest.find_gene(id.kind(), id.name(), id.architecture()) {
                Some((architecture, hash)) => (
                    id.with_geneset(manifest.identifier.clone())
                        .with_architecture(architecture),
                    Some(hash),
                ),
                None => (id.clone(), None),
            },
            None => (id.clone(), None),
        };

        let mut removed = false;
        if let Some(hash) = hash {
            removed |= self.update_ledger(target.geneset(), |ledger| {
                let present = ledger.remove(&hash);
                (present, present)
            })?;
        }

        let path = self.layout.content(&target);
        match fs::remove_file(&path) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(path.display(), e)),
        }

        if removed {
            info!("Removed {} from the gene cache", target);
        }
        Ok(removed)
    }

    // -- Parts and merge -----------------------------------------------------

    /// Gene manifest saved alongside an in-progress download
    pub fn cached_gene_manifest(
        &self,
        geneset: &GeneSetIdentifier,
        hash: &GeneHash,
    ) -> Result<Option<GeneManifest>> {
        let path = self.layout.temp_manifest(geneset, hash);
        match read_json::<GeneManifest>(&path)? {
            Some(manifest) if &manifest.gene == hash => Ok(Some(manifest)),
            Some(manifest) => Err(Error::Corruption {
                path: path.display().to_string(),
                message: format!("manifest is for {}, expected {}", manifest.gene, hash),
            }),
            None => Ok(None),
        }
    }

    /// Save the gene manifest for an in-progress download
    ///
    /// If a different manifest was saved before, its parts are discarded. An
    /// unparseable saved manifest is overwritten; I/O failures propagate.
    pub fn save_gene_manifest(&self, geneset: &GeneSetIdentifier, manifest: &GeneManifest) -> Result<()> {
        let existing = match self.cached_gene_manifest(geneset, &manifest.gene) {
            Ok(existing) => existing,
            Err(e @ Error::Corruption { .. }) => {
                warn!("Replacing unreadable gene manifest for {}: {}", manifest.gene, e);
                None
            }
            Err(e) => return Err(e),
        };
        if existing.as_ref().is_some_and(|m| m != manifest) {
            debug!("Gene manifest of {} changed; discarding downloaded parts", manifest.gene);
            self.discard_parts(geneset, &manifest.gene)?;
        }

        write_atomic(
            &self.layout.temp_manifest(geneset, &manifest.gene),
            &serde_json::to_vec_pretty(manifest)?,
        )
    }

    /// Destination file of a part
    pub fn part_path(&self, geneset: &GeneSetIdentifier, hash: &GeneHash, part: &GenePartHash) -> PathBuf {
        self.layout.part(geneset, hash, part)
    }

    /// Parts already downloaded and verified, with their sizes
    ///
    /// Part files whose digest does not match are deleted.
    pub fn get_downloaded_parts(
        &self,
        id: &UniqueGeneIdentifier,
        hash: &GeneHash,
    ) -> Result<HashMap<GenePartHash, u64>> {
        let geneset = id.geneset();
        let manifest = match self.cached_gene_manifest(geneset, hash) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Ok(HashMap::new()),
            Err(e) if e.is_cache_miss() => {
                warn!("Ignoring unreadable gene manifest for {}: {}", hash, e);
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e),
        };

        let mut parts = HashMap::new();
        for part in &manifest.parts {
            let path = self.layout.part(geneset, hash, part);
            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };

            match part.matches_file(&path) {
                Ok(true) => {
                    parts.insert(part.clone(), size);
                }
                Ok(false) => {
                    warn!("Deleting part {} of {}: hash mismatch", part, hash);
                    let _ = fs::remove_file(&path);
                }
                Err(e) => {
                    warn!("Deleting unreadable part {} of {}: {}", part, hash, e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        debug!(
            "{} of {} parts of {} already downloaded",
            parts.len(),
            manifest.parts.len(),
            hash
        );
        Ok(parts)
    }

    fn discard_parts(&self, geneset: &GeneSetIdentifier, hash: &GeneHash) -> Result<()> {
        let dir = self.layout.temp_dir(geneset, hash);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(dir.display(), e)),
        }
    }

    /// Merge the downloaded parts of `hash` into the content of `id`
    ///
    /// The ledger entry is removed before any content is written and added
    /// back only after the merged content has been verified, so an
    /// interrupted merge never leaves a usable-looking entry behind.
    pub fn merge(&self, id: &UniqueGeneIdentifier, hash: &GeneHash) -> Result<GeneContent> {
        let geneset = id.geneset();
        let manifest = self.cached_gene_manifest(geneset, hash)?.ok_or_else(|| {
            Error::Storage(format!("no gene manifest for {hash} in {geneset}"))
        })?;

        let part_paths: Vec<PathBuf> = manifest
            .parts
            .iter()
            .map(|part| self.layout.part(geneset, hash, part))
            .collect();
        let missing = part_paths.iter().filter(|p| !p.is_file()).count();
        if missing > 0 {
            return Err(Error::IncompleteTransfer {
                gene: id.to_string(),
                missing,
                total: part_paths.len(),
            });
        }

        self.update_ledger(geneset, |ledger| {
            let present = ledger.remove(hash);
            (present, ())
        })?;

        info!("Merging {} parts of {} into {}", part_paths.len(), hash, id);
        let path = self.layout.content(id);
        let (actual, size) = match write_merged(&part_paths, &manifest, &path) {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&path);
                if matches!(e, Error::Integrity { .. }) {
                    self.discard_parts(geneset, hash)?;
                }
                return Err(e);
            }
        };

        if actual != *hash || size != manifest.original_size {
            warn!("Merged content of {} failed verification; discarding", id);
            let _ = fs::remove_file(&path);
            self.discard_parts(geneset, hash)?;
            let (expected, actual) = if actual != *hash {
                (hash.to_string(), actual.to_string())
            } else {
                (
                    format!("{} bytes", manifest.original_size),
                    format!("{size} bytes"),
                )
            };
            return Err(Error::Integrity {
                subject: id.to_string(),
                expected,
                actual,
            });
        }

        self.update_ledger(geneset, |ledger| {
            ledger.insert(hash.clone());
            (true, ())
        })?;
        self.discard_parts(geneset, hash)?;

        info!("Merged {} ({} bytes)", id, size);
        Ok(GeneContent {
            id: id.clone(),
            hash: hash.clone(),
            path,
            size,
        })
    }
}

/// Decompress the concatenated parts into `dest`, returning the content hash and size
fn write_merged(parts: &[PathBuf], manifest: &GeneManifest, dest: &Path) -> Result<(GeneHash, u64)> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::storage(parent.display(), e))?;
    }

    let mut readers: Vec<Box<dyn Read>> = Vec::with_capacity(parts.len());
    for path in parts {
        let file = fs::File::open(path).map_err(|e| Error::storage(path.display(), e))?;
        readers.push(Box::new(BufReader::new(file)));
    }
    let mut decoder = compression::create_decoder(concat_readers(readers), manifest.format)?;

    let mut out = fs::File::create(dest).map_err(|e| Error::storage(dest.display(), e))?;
    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = decoder.read(&mut buffer).map_err(|e| {
            Error::Integrity {
                subject: manifest.gene.to_string(),
                expected: format!("valid {} stream", manifest.format),
                actual: e.to_string(),
            }
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        out.write_all(&buffer[..n])
            .map_err(|e| Error::storage(dest.display(), e))?;
        size += n as u64;
    }
    out.sync_all().map_err(|e| Error::storage(dest.display(), e))?;

    Ok((hasher.finalize_as(), size))
}

/// Copy `source` to `dest` if its content hashes to `hash`, returning the size
fn copy_verified(source: &Path, dest: &Path, hash: &GeneHash) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::storage(parent.display(), e))?;
    }
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".copy");
    let partial = dest.with_file_name(name);

    let (actual, size) = match copy_hashed(source, &partial) {
        Ok(result) => result,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };
    if &actual != hash {
        let _ = fs::remove_file(&partial);
        return Err(Error::Integrity {
            subject: source.display().to_string(),
            expected: hash.to_string(),
            actual: actual.to_string(),
        });
    }

    fs::rename(&partial, dest).map_err(|e| Error::storage(dest.display(), e))?;
    Ok(size)
}

fn copy_hashed(source: &Path, dest: &Path) -> Result<(GeneHash, u64)> {
    let file = fs::File::open(source).map_err(|e| Error::storage(source.display(), e))?;
    let mut input = BufReader::new(file);
    let mut out = fs::File::create(dest).map_err(|e| Error::storage(dest.display(), e))?;
    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = input
            .read(&mut buffer)
            .map_err(|e| Error::storage(source.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        out.write_all(&buffer[..n])
            .map_err(|e| Error::storage(dest.display(), e))?;
        size += n as u64;
    }
    out.sync_all().map_err(|e| Error::storage(dest.display(), e))?;

    Ok((hasher.finalize_as(), size))
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::storage(dir.display(), e)),
    };

    Ok(entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && file_name(path).is_some_and(|n| !n.starts_with('.')))
        .collect())
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
