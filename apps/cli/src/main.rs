//! SiteCorpus CLI: crawl business websites into machine-consumable corpora.
//!
//! Registers target websites, crawls them with strategy fallback, keeps the
//! fetched pages on disk and exports processed content in several formats.

mod commands;
mod store;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
