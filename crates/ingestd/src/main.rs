//! CLI entry point. Gathers `Config` overrides and starts the `Server`;
//! has no hot-path role of its own.

use clap::Parser;
use ingestd::{Config, Server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ingestd")]
#[command(about = "Single-node metric ingestion service")]
struct Cli {
    /// Path to a TOML config file. Defaults are used for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the listening address (`INGESTD_LISTEN_ADDR` env, then
    /// this flag, takes highest precedence).
    #[arg(long)]
    listen: Option<String>,

    /// Overrides the fixed worker count.
    #[arg(long)]
    workers: Option<usize>,

    /// Overrides the per-client rate limit.
    #[arg(long)]
    rate_limit: Option<u32>,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to load config, falling back to defaults");
        Config::default()
    });
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(rate_limit) = cli.rate_limit {
        config.rate_limit = rate_limit;
    }

    let server = Arc::new(Server::new(config)?);

    let shutdown_server = Arc::clone(&server);
    ctrlc::set_handler(move || {
        tracing::info!("signal received, shutting down");
        shutdown_server.request_shutdown();
    })
    .expect("failed to install signal handler");

    server.run()?;

    match Arc::try_unwrap(server) {
        Ok(server) => server.join_background(),
        Err(_) => tracing::warn!("server still has live references after accept loop exit"),
    }

    Ok(())
}
