//! b_verify server binary
//!
//! Run: cargo run --release -- --rescan-blocks 144

use std::sync::Arc;

use anyhow::Result;
use bverify_server::{LoopbackPublisher, Server, ServerConfig};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Recent blocks to search for commitments published before a restart
    #[arg(long, env = "BVERIFY_RESCAN_BLOCKS", default_value_t = 0)]
    rescan_blocks: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::from_env().with_rescan_blocks(args.rescan_blocks);

    info!("b_verify server");
    info!("  listen:          {}", config.listen_addr);
    info!("  auto commit:     {} (every {}s)", config.auto_commit, config.commit_interval_secs);
    info!("  rescan blocks:   {}", config.rescan_blocks);
    match &config.data_dir {
        Some(dir) => info!("  data dir:        {}", dir.display()),
        None => info!("  data dir:        none, state is not persisted"),
    }

    let server = Server::new(config, Arc::new(LoopbackPublisher::new())).await?;

    tokio::select! {
        result = server.run() => result,
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutting down");
            Ok(())
        }
    }
}
