//! Forkflow CLI entry point

use anyhow::Result;
use clap::Parser;
use forkflow::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    cli::init_logger(cli.log_level()?);

    log::debug!("forkflow v{}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
