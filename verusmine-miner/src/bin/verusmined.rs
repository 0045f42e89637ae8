//! Main entry point for the verusmine daemon.

use anyhow::Result;
use clap::Parser;

use verusmine_miner::config::{MinerConfig, Options};
use verusmine_miner::daemon::Daemon;
use verusmine_miner::tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::parse();
    tracing::init(options.quiet);

    let config = MinerConfig::load(&options)?;
    Daemon::new(config).run().await
}
