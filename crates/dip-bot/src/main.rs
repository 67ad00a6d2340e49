//! dip-bot: real-time dip arbitrage for crypto up/down prediction markets.
//!
//! Usage:
//!   dip-bot [OPTIONS]
//!
//! Options:
//!   -m, --mode <MODE>         Trading mode: live, paper
//!   -c, --config <FILE>       Config file path (default: config/dip-bot.toml)
//!   --assets <ASSETS>         Comma-separated assets (overrides config)
//!   -t, --timeframe <TF>      Window timeframe: 15m, 1h, 4h, daily
//!   --simulate-feed           Use the synthetic feed instead of the exchange

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use dip_market::{CatalogConfig, MarketCatalog, TokenIndex};

use dip_bot::api::{ClobClient, ClobClientConfig, OrderSigner};
use dip_bot::config::{BotConfig, TradingMode};
use dip_bot::engine::Engine;
use dip_bot::executor::{LiveLegClient, PaperLegClient, TradeExecutor, TradeExecutorConfig};
use dip_bot::presign::{PresignCache, Presigner};
use dip_bot::resolution::ResolutionTracker;
use dip_bot::state::{CooldownTracker, Metrics, PendingAdmissions};
use dip_bot::store::PositionStore;
use dip_bot::strategy::{Detector, DetectorConfig};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "dip-bot")]
#[command(about = "Dip arbitrage bot for crypto up/down prediction markets")]
#[command(version)]
struct Args {
    /// Trading mode: live, paper
    #[arg(short, long)]
    mode: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "config/dip-bot.toml")]
    config: PathBuf,

    /// Comma-separated assets to watch (e.g. "BTC,ETH")
    #[arg(long, value_delimiter = ',')]
    assets: Option<Vec<String>>,

    /// Window timeframe: 15m, 1h, 4h, daily
    #[arg(short, long)]
    timeframe: Option<String>,

    /// Use the synthetic feed instead of the exchange push channel
    #[arg(long)]
    simulate_feed: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // .env is optional; a missing file is not an error.
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        eprintln!(
            "Config file not found at {:?}, using defaults",
            args.config
        );
        BotConfig::default()
    };
    config.apply_env_overrides();
    config.apply_cli_overrides(args.mode, args.assets, args.timeframe);
    if args.simulate_feed {
        config.simulate_feed = true;
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!("starting dip-bot");
    info!(mode = %config.mode, timeframe = %config.timeframe, assets = ?config.assets, "configuration");

    config.validate().context("Configuration validation failed")?;

    // Durable store first: a broken database is fatal at boot.
    let store = Arc::new(
        PositionStore::open(&config.db_path)
            .with_context(|| format!("Failed to open position store at {}", config.db_path))?,
    );

    let catalog = Arc::new(MarketCatalog::new(CatalogConfig {
        endpoint: config.endpoints.gamma.clone(),
        assets: config.assets.clone(),
        timeframe: config.timeframe,
        max_offset: 1,
        request_timeout: Duration::from_secs(5),
    }));
    let index = Arc::new(TokenIndex::new());

    let admissions = Arc::new(PendingAdmissions::new(config.trading.max_open_positions));
    let cooldowns = Arc::new(CooldownTracker::new());
    let metrics = Arc::new(Metrics::new());

    let detector = Detector::new(
        DetectorConfig::from_trading(&config.trading, config.timeframe),
        admissions.clone(),
        cooldowns.clone(),
    );

    // Executor wiring depends on the mode.
    let executor_config = TradeExecutorConfig {
        max_total_cost: config.trading.max_total_cost,
        price_buffer: config.execution.price_buffer,
        order_timeout: Duration::from_millis(config.execution.order_timeout_ms),
    };

    let (executor, presign_cache, presigner) = match config.mode {
        TradingMode::Live => {
            let private_key = config
                .wallet
                .private_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("live mode requires DIP_PRIVATE_KEY"))?;
            let signer = OrderSigner::new(private_key).context("Invalid private key")?;
            let mut clob = ClobClient::new(
                ClobClientConfig {
                    base_url: config.endpoints.clob_rest.clone(),
                    order_timeout: Duration::from_millis(config.execution.order_timeout_ms),
                },
                signer,
            );
            info!("authenticating with the CLOB");
            clob.authenticate()
                .await
                .context("CLOB authentication failed")?;
            let clob = Arc::new(clob);

            let cache = Arc::new(PresignCache::new());
            let leg_client = LiveLegClient::new(clob.clone()).with_presign(
                cache.clone(),
                Duration::from_secs(config.presign.evict_secs),
            );
            let presigner = if config.presign.enabled {
                Some(Presigner::new(
                    cache.clone(),
                    clob.clone(),
                    config.presign.clone(),
                ))
            } else {
                None
            };
            (
                Arc::new(TradeExecutor::new(Arc::new(leg_client), executor_config)),
                Some(cache),
                presigner,
            )
        }
        TradingMode::Paper => {
            info!("paper mode: orders are simulated");
            let leg_client = PaperLegClient::new(&config.execution);
            (
                Arc::new(TradeExecutor::new(Arc::new(leg_client), executor_config)),
                None,
                None,
            )
        }
    };

    let resolution = ResolutionTracker::new(
        store.clone(),
        catalog.clone(),
        metrics.clone(),
        config.timeframe,
        config.mode == TradingMode::Paper,
    );

    let engine = Engine {
        config,
        catalog,
        index,
        store: store.clone(),
        executor,
        presign_cache,
        presigner,
        resolution: Some(resolution),
        detector,
        admissions,
        cooldowns,
        metrics: metrics.clone(),
    };

    // Shutdown plumbing: first signal stops the engine, which drains
    // in-flight executions before returning.
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(4);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown().await {
                warn!(error = %e, "shutdown signal handler error");
            }
            info!("shutdown requested");
            let _ = shutdown.send(());
        });
    }

    engine.run(shutdown_tx).await?;

    let final_stats = store.stats().context("Failed to read final stats")?;
    info!(
        total = final_stats.total,
        open = final_stats.open,
        resolved = final_stats.resolved,
        failed = final_stats.failed,
        net_profit = %final_stats.net_profit,
        "final position stats"
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["dip-bot"]).unwrap();
        assert_eq!(args.config.to_str().unwrap(), "config/dip-bot.toml");
        assert!(args.mode.is_none());
        assert!(!args.simulate_feed);
    }

    #[test]
    fn test_cli_mode_and_assets() {
        let args =
            Args::try_parse_from(["dip-bot", "-m", "paper", "--assets", "BTC,SOL"]).unwrap();
        assert_eq!(args.mode.as_deref(), Some("paper"));
        assert_eq!(
            args.assets,
            Some(vec!["BTC".to_string(), "SOL".to_string()])
        );
    }

    #[test]
    fn test_cli_timeframe_and_sim() {
        let args =
            Args::try_parse_from(["dip-bot", "-t", "1h", "--simulate-feed"]).unwrap();
        assert_eq!(args.timeframe.as_deref(), Some("1h"));
        assert!(args.simulate_feed);
    }
}
