/// live_main.rs — Live Trading Entry Point
///
/// Runs the strategy against the Hyperliquid public trades feed.
///
/// FLOW:
///   1. Load config from .env (HL_PRIVATE_KEY, DRY_RUN, SYMBOL, etc.)
///   2. Restore the paper account from ACCOUNT_STATE_PATH if present
///   3. Optional Postgres store (DATABASE_URL)
///   4. Warm up the rolling window from recent candles (WARMUP_CANDLES)
///   5. Spawn the trade feed and the session; ticks flow over an mpsc queue
///   6. Ctrl-C → shutdown: feed unsubscribes, session flushes the account
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meanrev_engine::account::PaperAccount;
use meanrev_engine::config::AppConfig;
use meanrev_engine::data::fetch_warmup_ticks;
use meanrev_engine::engine::TradingEngine;
use meanrev_engine::exchange::HyperliquidClient;
use meanrev_engine::executor::OrderExecutor;
use meanrev_engine::schedule::Shutdown;
use meanrev_engine::store::PostgresStore;
use meanrev_engine::stream::TradeFeed;

const TICK_QUEUE: usize = 4096;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env()?;

    info!("╔══════════════════════════════════════════════╗");
    info!("║   MEAN REVERSION ENGINE  —  LIVE TRADER      ║");
    info!("╚══════════════════════════════════════════════╝");
    if cfg.dry_run {
        info!("DRY RUN — orders are simulated at the signal price");
    } else if cfg.use_testnet {
        info!("LIVE orders on TESTNET");
    } else {
        warn!("⚠️  LIVE MODE ON MAINNET — REAL MONEY — ensure all parameters are correct!");
    }

    // ── Ledger ────────────────────────────────────────────────────────────
    let account = match &cfg.account_state_path {
        Some(path) if path.exists() => {
            let account = PaperAccount::load_json(path)?;
            info!("Restored account {} from {}", account.name, path.display());
            account
        }
        _ => PaperAccount::new(cfg.account_name.clone(), cfg.initial_balance)
            .with_leverage(cfg.leverage)
            .with_fee_rate(cfg.fee_rate),
    };
    info!("\n{}", account.get_account_summary());

    let executor = OrderExecutor::from_config(&cfg)?;
    let mut engine = TradingEngine::new(cfg.clone(), executor, account);

    if let Some(url) = &cfg.database_url {
        let store = PostgresStore::connect(url).await?;
        store.migrate().await?;
        engine = engine.with_store(store);
    }

    // ── Warm up ───────────────────────────────────────────────────────────
    if cfg.warmup_candles > 0 {
        let client = HyperliquidClient::from_config(&cfg)?;
        match fetch_warmup_ticks(&client, &cfg.strategy.symbol, &cfg.candle_interval, cfg.warmup_candles).await {
            Ok(ticks) => {
                engine.warm_up(&ticks);
            }
            Err(e) => warn!("Warm-up failed, window fills from the live feed: {}", e),
        }
    }
    engine.reconcile().await;

    // ── Feed + session ────────────────────────────────────────────────────
    let (tx, rx) = mpsc::channel(TICK_QUEUE);
    let (shutdown, signal) = Shutdown::new();

    let feed = TradeFeed::new(&cfg.ws_url, &cfg.strategy.symbol, tx);
    let feed_task = tokio::spawn(feed.run(shutdown.subscribe()));
    let session = tokio::spawn(engine.run(rx, signal));

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down...");
    shutdown.trigger();

    match feed_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Trade feed failed: {}", e),
        Err(e) => error!("Trade feed task panicked: {}", e),
    }
    let summary = session.await??;
    println!("\n{}", summary);
    Ok(())
}
