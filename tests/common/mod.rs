// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! `FakeRepository` is an in-memory genepool. Part URLs use the `mem://`
//! scheme and are served from memory, so no test touches the network.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use genepool::compression::CompressionFormat;
use genepool::manifest::PartDownload;
use genepool::repository::PartStream;
use genepool::{
    Error, GeneDownloadInfo, GeneHash, GeneManifest, GenePartHash, GeneRepository, GeneSetIdentifier,
    GeneSetManifest, LocalGenePool, ResolverOptions, Result, RetryPolicy,
};
use parking_lot::Mutex;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Deterministic incompressible bytes
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// A gzip-compressed gene split into parts
#[derive(Debug, Clone)]
pub struct BuiltGene {
    pub content: Vec<u8>,
    pub manifest: GeneManifest,
    pub parts: Vec<Bytes>,
}

impl BuiltGene {
    pub fn hash(&self) -> GeneHash {
        self.manifest.gene.clone()
    }
}

/// Compress `content` with gzip and split it into parts of `part_size` bytes
pub fn build_gene(content: &[u8], part_size: usize) -> BuiltGene {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    let compressed = encoder.finish().unwrap();

    let parts: Vec<Bytes> = compressed
        .chunks(part_size)
        .map(Bytes::copy_from_slice)
        .collect();
    let manifest = GeneManifest {
        gene: GeneHash::compute(content),
        format: CompressionFormat::Gzip,
        size: compressed.len() as u64,
        original_size: content.len() as u64,
        parts: parts.iter().map(|p| GenePartHash::compute(p)).collect(),
    };

    BuiltGene {
        content: content.to_vec(),
        manifest,
        parts,
    }
}

pub fn set(s: &str) -> GeneSetIdentifier {
    GeneSetIdentifier::parse(s).unwrap()
}

pub fn gene(s: &str) -> genepool::UniqueGeneIdentifier {
    genepool::UniqueGeneIdentifier::parse(s).unwrap()
}

/// Resolver options without real delays
pub fn fast_options() -> ResolverOptions {
    ResolverOptions {
        retry: RetryPolicy {
            rounds: 5,
            delay: Duration::from_millis(5),
        },
        progress_interval: Duration::ZERO,
        ..ResolverOptions::default()
    }
}

pub fn open_store(root: &Path) -> LocalGenePool {
    LocalGenePool::new(root).unwrap()
}

#[derive(Default)]
struct FakeState {
    genesets: HashMap<GeneSetIdentifier, GeneSetManifest>,
    genes: HashMap<GeneHash, BuiltGene>,
    geneset_failure: Option<Error>,
    gene_failure: Option<Error>,
    /// Gene manifest answers still to hand out with nearly expired URLs
    expiring_answers: u32,
    /// Remaining corrupted bodies per part
    corrupt_parts: HashMap<GenePartHash, u32>,
    /// Remaining transient failures per part
    failing_parts: HashMap<GenePartHash, u32>,
    /// Parts whose body stops after the first chunk and never ends
    stalled_parts: HashSet<GenePartHash>,
    part_downloads: HashMap<GenePartHash, usize>,
}

/// In-memory repository with call counters
pub struct FakeRepository {
    name: String,
    state: Mutex<FakeState>,
    latency: Mutex<Duration>,
    geneset_calls: AtomicUsize,
    gene_calls: AtomicUsize,
    part_calls: AtomicUsize,
}

impl FakeRepository {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(FakeState::default()),
            latency: Mutex::new(Duration::ZERO),
            geneset_calls: AtomicUsize::new(0),
            gene_calls: AtomicUsize::new(0),
            part_calls: AtomicUsize::new(0),
        })
    }

    pub fn add_geneset(&self, manifest: GeneSetManifest) {
        self.state.lock().genesets.insert(manifest.identifier.clone(), manifest);
    }

    pub fn add_gene(&self, gene: &BuiltGene) {
        self.state.lock().genes.insert(gene.hash(), gene.clone());
    }

    /// Answer every geneset request with `error`
    pub fn fail_genesets(&self, error: Error) {
        self.state.lock().geneset_failure = Some(error);
    }

    /// Answer every gene manifest request with `error`
    pub fn fail_genes(&self, error: Error) {
        self.state.lock().gene_failure = Some(error);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.geneset_failure = None;
        state.gene_failure = None;
    }

    /// The next `count` gene manifest answers carry URLs expiring in two minutes
    pub fn expire_urls(&self, count: u32) {
        self.state.lock().expiring_answers = count;
    }

    /// Serve a corrupted body for `part` the next `times` downloads
    pub fn corrupt_part(&self, part: &GenePartHash, times: u32) {
        self.state.lock().corrupt_parts.insert(part.clone(), times);
    }

    /// Fail the next `times` downloads of `part` with a transient error
    pub fn fail_part(&self, part: &GenePartHash, times: u32) {
        self.state.lock().failing_parts.insert(part.clone(), times);
    }

    /// Send the first half of `part` and then nothing at all
    pub fn stall_part(&self, part: &GenePartHash) {
        self.state.lock().stalled_parts.insert(part.clone());
    }

    /// Delay every manifest answer
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn geneset_calls(&self) -> usize {
        self.geneset_calls.load(Ordering::SeqCst)
    }

    pub fn gene_calls(&self) -> usize {
        self.gene_calls.load(Ordering::SeqCst)
    }

    pub fn part_calls(&self) -> usize {
        self.part_calls.load(Ordering::SeqCst)
    }

    /// Bodies served for `part`, corrupted ones included
    pub fn part_downloads(&self, part: &GenePartHash) -> usize {
        self.state.lock().part_downloads.get(part).copied().unwrap_or(0)
    }

    fn part_url(&self, part: &GenePartHash) -> Url {
        Url::parse(&format!("mem://{}/{}", self.name, part.hash_value())).unwrap()
    }

    async fn wait(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn take_one(counter: Option<&mut u32>) -> bool {
    match counter {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl GeneRepository for FakeRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_geneset_manifest(&self, id: &GeneSetIdentifier) -> Result<Option<GeneSetManifest>> {
        self.geneset_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;

        let state = self.state.lock();
        if let Some(error) = &state.geneset_failure {
            return Err(error.clone());
        }
        Ok(state.genesets.get(id).cloned())
    }

    async fn fetch_gene_manifest(
        &self,
        _geneset: &GeneSetIdentifier,
        hash: &GeneHash,
    ) -> Result<Option<GeneDownloadInfo>> {
        self.gene_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;

        let mut state = self.state.lock();
        if let Some(error) = &state.gene_failure {
            return Err(error.clone());
        }
        let Some(gene) = state.genes.get(hash).cloned() else {
            return Ok(None);
        };

        let expires = if take_one(Some(&mut state.expiring_answers)) {
            Utc::now() + chrono::Duration::minutes(2)
        } else {
            Utc::now() + chrono::Duration::hours(1)
        };

        Ok(Some(GeneDownloadInfo {
            parts: gene
                .manifest
                .parts
                .iter()
                .map(|part| PartDownload {
                    part: part.clone(),
                    url: self.part_url(part),
                })
                .collect(),
            manifest: gene.manifest,
            download_expires: expires,
        }))
    }

    async fn open_part(&self, url: &Url) -> Result<PartStream> {
        self.part_calls.fetch_add(1, Ordering::SeqCst);

        let value = url.path().trim_start_matches('/');
        let part = GenePartHash::from_hex(value)?;

        let mut state = self.state.lock();
        if take_one(state.failing_parts.get_mut(&part)) {
            return Err(Error::transient(&self.name, "HTTP 503"));
        }

        let body = state
            .genes
            .values()
            .find_map(|gene| {
                gene.manifest
                    .parts
                    .iter()
                    .position(|p| p == &part)
                    .map(|index| gene.parts[index].clone())
            })
            .ok_or_else(|| Error::transient(&self.name, format!("unknown part {part}")))?;

        *state.part_downloads.entry(part.clone()).or_default() += 1;
        let body = if take_one(state.corrupt_parts.get_mut(&part)) {
            let mut corrupted = body.to_vec();
            corrupted[0] ^= 0xff;
            Bytes::from(corrupted)
        } else {
            body
        };

        // Split the body to exercise streaming
        let middle = body.len() / 2;
        if state.stalled_parts.contains(&part) {
            let head = futures::stream::iter(vec![Ok::<Bytes, Error>(body.slice(..middle))]);
            return Ok(Box::pin(head.chain(futures::stream::pending::<Result<Bytes>>())));
        }
        let chunks: Vec<Result<Bytes>> = vec![Ok(body.slice(..middle)), Ok(body.slice(middle..))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
