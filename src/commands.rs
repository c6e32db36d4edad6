// src/commands.rs
//! Command handlers for the genepool CLI

use anyhow::{Context, Result};
use genepool::progress::GeneProgress;
use genepool::{GeneHash, GenePool, GenePoolConfig, GeneSetIdentifier, ProgressCallback, UniqueGeneIdentifier};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Load the configuration the CLI runs with
///
/// An explicit path must exist; the default location is optional.
pub fn load_config(path: Option<&Path>, cache: Option<PathBuf>) -> Result<GenePoolConfig> {
    let mut config = match path {
        Some(path) => GenePoolConfig::load(path)?,
        None => match dirs::config_dir().map(|dir| dir.join("genepool").join("config.toml")) {
            Some(default) if default.exists() => {
                debug!("Using configuration {}", default.display());
                GenePoolConfig::load(&default)?
            }
            _ => GenePoolConfig::default(),
        },
    };

    if let Some(root) = cache {
        config.cache.root = root;
    }
    Ok(config)
}

fn parse_gene(gene: &str) -> Result<UniqueGeneIdentifier> {
    UniqueGeneIdentifier::parse(gene).with_context(|| format!("Invalid gene identifier: {gene}"))
}

pub async fn cmd_resolve(pool: &GenePool, geneset: &str) -> Result<()> {
    let id = GeneSetIdentifier::parse(geneset)
        .with_context(|| format!("Invalid geneset identifier: {geneset}"))?;

    let manifest = pool.resolve_geneset(&id).await?;
    if manifest.identifier != id {
        println!("{} -> {}", id, manifest.identifier);
    } else {
        println!("{}", manifest.identifier);
    }

    for (gene, hash) in manifest.genes()? {
        println!("  {gene}  {hash}");
    }
    Ok(())
}

fn progress_bar(gene: &UniqueGeneIdentifier) -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.green/dim}] {bytes}/{total_bytes} ({percent}%)")?
            .progress_chars("##-"),
    );
    bar.set_message(gene.name().to_string());
    Ok(bar)
}

pub async fn cmd_fetch(pool: &GenePool, gene: &str, hash: Option<&str>, quiet: bool) -> Result<()> {
    let id = parse_gene(gene)?;
    let hash = hash
        .map(GeneHash::parse)
        .transpose()
        .context("Invalid gene hash")?;

    let bar = if quiet { None } else { Some(progress_bar(&id)?) };
    let progress: Option<ProgressCallback> = bar.clone().map(|bar| {
        Arc::new(move |p: GeneProgress| {
            bar.set_length(p.total);
            bar.set_position(p.done);
        }) as ProgressCallback
    });

    let result = pool.request_gene(&id, hash, progress).await;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let content = result.with_context(|| format!("Failed to fetch {id}"))?;
    info!("{} available ({})", content.id, HumanBytes(content.size));
    println!("{}", content.path.display());
    Ok(())
}

pub async fn cmd_show(pool: &GenePool, gene: &str) -> Result<()> {
    let id = parse_gene(gene)?;

    match pool.get_cached_content(&id).await? {
        Some(content) => {
            println!("Gene:  {}", content.id);
            println!("Hash:  {}", content.hash);
            println!("Size:  {}", HumanBytes(content.size));
            println!("Path:  {}", content.path.display());
        }
        None => println!("{id} is not cached"),
    }
    Ok(())
}

pub async fn cmd_remove(pool: &GenePool, gene: &str) -> Result<()> {
    let id = parse_gene(gene)?;

    if pool.remove(&id).await? {
        println!("Removed {id}");
    } else {
        println!("{id} is not cached");
    }
    Ok(())
}

pub async fn cmd_ls(pool: &GenePool) -> Result<()> {
    let genesets = pool.list_cached_genesets().await?;
    if genesets.is_empty() {
        println!("No cached genesets in {}", pool.store().root().display());
        return Ok(());
    }

    for geneset in genesets {
        let ledger = pool.ledger(&geneset).await?;
        println!("{}  ({} genes cached)", geneset, ledger.len());
    }
    Ok(())
}
