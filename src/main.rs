use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use lobfeed_rs::config::AppConfig;
use lobfeed_rs::market_data::router;
use lobfeed_rs::telemetry;

/// Streams Kraken level3 order books into a local multi-symbol book.
#[derive(Debug, Parser)]
#[command(name = "lobfeed", version)]
struct Cli {
    /// TOML config file; `LOBFEED__SECTION__KEY` variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Symbol to subscribe to; repeat for several. Replaces the configured list.
    #[arg(long = "symbol")]
    symbols: Vec<String>,

    /// Levels kept per side.
    #[arg(long)]
    depth: Option<usize>,

    /// Print books as JSON instead of a top-of-book line.
    #[arg(long)]
    json: bool,

    /// Replay frames from a file (one JSON frame per line) instead of connecting.
    #[arg(long)]
    replay: Option<PathBuf>,

    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if !cli.symbols.is_empty() {
        config.feed.symbols = cli.symbols;
    }
    if let Some(depth) = cli.depth {
        config.book.depth = depth;
    }
    if cli.json {
        config.display.json = true;
    }
    if let Some(filter) = cli.log_filter {
        config.telemetry.log_filter = filter;
    }

    telemetry::init_tracing(&config.telemetry.log_filter);
    telemetry::init_metrics(config.telemetry.metrics_port)?;
    info!(symbols = ?config.feed.symbols, depth = config.book.depth, "Starting lobfeed");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received, shutting down");
    };

    let registry = router::run(&config, cli.replay.as_deref(), shutdown).await?;
    for book in registry.books() {
        info!(
            symbol = book.symbol(),
            orders = book.order_count(),
            best_bid = ?book.best_bid(),
            best_ask = ?book.best_ask(),
            "Final book"
        );
    }
    Ok(())
}
