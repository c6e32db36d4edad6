// src/cli.rs
//! CLI definitions for genepool
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "genepool")]
#[command(version)]
#[command(about = "Resolve, download and cache genes from genepool repositories", long_about = None)]
pub struct Cli {
    /// Configuration file (default: <config dir>/genepool/config.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the cache root directory
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a geneset, following references, and list its genes
    Resolve {
        /// Geneset identifier (org/geneset[/tag])
        geneset: String,
    },

    /// Download a gene into the cache and print its path
    Fetch {
        /// Gene identifier (kind::gene:org/geneset/tag:name[arch])
        gene: String,

        /// Known content hash; skips geneset resolution
        #[arg(long)]
        hash: Option<String>,

        /// Do not draw a progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show cached content of a gene without contacting any repository
    Show {
        /// Gene identifier (kind::gene:org/geneset/tag:name[arch])
        gene: String,
    },

    /// Remove a gene from the cache
    Remove {
        /// Gene identifier (kind::gene:org/geneset/tag:name[arch])
        gene: String,
    },

    /// List cached genesets
    Ls,
}
