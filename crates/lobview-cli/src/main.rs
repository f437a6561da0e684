//! Live order book aggregation demo.
//!
//! Connects the Binance, FoxBit, and Mercado Bitcoin connectors, feeds them
//! into the aggregation manager, and logs the consolidated top of book plus
//! connection status until interrupted.

use anyhow::Result;
use clap::Parser;
use lobview_core::{ConnectorConfig, ReconnectPolicy};
use lobview_manager::{AggregationManager, ManagerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Multi-exchange order book aggregator
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Base asset to watch (quoted in USDT on Binance, BRL elsewhere)
    #[arg(short, long, default_value = "BTC")]
    asset: String,

    /// Order book depth per side
    #[arg(short, long, default_value_t = 20)]
    depth: usize,

    /// Debounce window for consolidated view publication, in milliseconds
    #[arg(long, default_value_t = 100)]
    window_ms: u64,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "info,lobview_core=debug,lobview_ws=debug,lobview_connectors=debug,\
             lobview_manager=debug,lobview_cli=debug",
        )
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn config(symbol: &str, depth: usize) -> ConnectorConfig {
    ConnectorConfig {
        symbol: symbol.to_string(),
        max_depth: Some(depth),
        reconnect: ReconnectPolicy::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS crypto provider must be installed before any connection attempt.
    lobview_connectors::init_crypto();

    let args = Args::parse();
    init_logging();

    info!("starting lobview v{}", env!("CARGO_PKG_VERSION"));

    let asset = args.asset.to_uppercase();
    let usdt_symbol = format!("{asset}/USDT");
    let brl_symbol = format!("{asset}/BRL");

    let manager = AggregationManager::new(ManagerConfig {
        debounce_window: Duration::from_millis(args.window_ms),
        ..ManagerConfig::default()
    });
    manager.register(Arc::new(lobview_connectors::binance::connector(config(
        &usdt_symbol,
        args.depth,
    ))));
    manager.register(Arc::new(lobview_connectors::foxbit::connector(config(
        &brl_symbol,
        args.depth,
    ))));
    manager.register(Arc::new(lobview_connectors::mercado::connector(config(
        &brl_symbol,
        args.depth,
    ))));

    let (_view_sub, mut views) = manager.subscribe_view();
    let (_status_sub, mut statuses) = manager.subscribe_status();
    let (_error_sub, mut errors) = manager.subscribe_errors();

    manager.connect_all().await;
    info!(status = ?manager.status().by_exchange, "initial connection round complete");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            Some(view) = views.recv() => {
                for (exchange, book) in &view.by_exchange {
                    let bid = book.best_bid().map(|l| l.price.to_string());
                    let ask = book.best_ask().map(|l| l.price.to_string());
                    info!(
                        exchange = %exchange,
                        symbol = %book.symbol,
                        best_bid = bid.as_deref().unwrap_or("-"),
                        best_ask = ask.as_deref().unwrap_or("-"),
                        "top of book"
                    );
                }
            }
            Some(status) = statuses.recv() => {
                info!(
                    connected = status.connected,
                    reconnecting = status.reconnecting,
                    errored = status.errored,
                    total = status.total(),
                    "connection status"
                );
            }
            Some(error) = errors.recv() => {
                warn!(
                    exchange = %error.exchange_id,
                    detail = error.detail.as_deref().unwrap_or("-"),
                    "{}", error.message
                );
            }
        }
    }

    manager.destroy().await;
    info!("shutdown complete");
    Ok(())
}
