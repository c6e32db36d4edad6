// src/main.rs

use anyhow::Result;
use clap::Parser;
use genepool::GenePool;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref(), cli.cache)?;
    let pool = GenePool::new(&config)?;

    let result = match cli.command {
        Commands::Resolve { geneset } => commands::cmd_resolve(&pool, &geneset).await,
        Commands::Fetch { gene, hash, quiet } => {
            commands::cmd_fetch(&pool, &gene, hash.as_deref(), quiet).await
        }
        Commands::Show { gene } => commands::cmd_show(&pool, &gene).await,
        Commands::Remove { gene } => commands::cmd_remove(&pool, &gene).await,
        Commands::Ls => commands::cmd_ls(&pool).await,
    };

    pool.shutdown().await;
    result
}
