/// main.rs — Backtesting Entry Point
///
/// Replays a price history through the dry-run session:
///   1. Load config from .env (strategy + paper account parameters)
///   2. Load prices from a CSV/Parquet file, or fetch Hyperliquid candles
///   3. Run a single replay, or an (entry_z, exit_z) sweep on the rayon pool
///   4. Print performance metrics
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use meanrev_engine::backtest::{print_sweep, replay, sweep, BacktestConfig};
use meanrev_engine::config::AppConfig;
use meanrev_engine::data::{fetch_warmup_ticks, interval_ms, load_history};
use meanrev_engine::exchange::HyperliquidClient;

const MS_PER_YEAR: f64 = 365.0 * 86_400_000.0;

#[derive(Parser)]
#[command(name = "backtest")]
#[command(about = "Z-score mean reversion backtest on Hyperliquid prices")]
#[command(version)]
struct Cli {
    /// Price history (.csv or .parquet); fetched from Hyperliquid when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Candles to fetch when no input file is given
    #[arg(short, long, default_value_t = 5000)]
    candles: u32,

    /// Candle interval (defaults to CANDLE_INTERVAL)
    #[arg(long)]
    interval: Option<String>,

    /// Sweep entry/exit thresholds instead of a single run
    #[arg(long)]
    sweep: bool,

    #[arg(long, value_delimiter = ',', default_values_t = [0.5, 0.75, 1.0, 1.5, 2.0, 2.5])]
    entries: Vec<f64>,

    #[arg(long, value_delimiter = ',', default_values_t = [0.0, 0.1, 0.25, 0.5])]
    exits: Vec<f64>,

    /// Rows of the sweep table to print
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Log every execution
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("╔══════════════════════════════════════════════╗");
    info!("║    MEAN REVERSION ENGINE  —  BACKTEST MODE   ║");
    info!("║    Rolling Z-score · paper ledger            ║");
    info!("╚══════════════════════════════════════════════╝");

    // ── Config ───────────────────────────────────────────────────────────
    let cfg = AppConfig::from_env()?;
    let s = &cfg.strategy;
    info!(
        "Strategy: symbol={} lookback={} entry_z={:.2} exit_z={:.2} cooldown={:?}",
        s.symbol, s.lookback_period, s.entry_z_score, s.exit_z_score, s.signal_cooldown
    );
    info!(
        "Account:  balance=${:.2} leverage={:.1}x fee={:.4}%",
        cfg.initial_balance, cfg.leverage, cfg.fee_rate * 100.0
    );

    // ── Prices ───────────────────────────────────────────────────────────
    let interval = cli.interval.clone().unwrap_or_else(|| cfg.candle_interval.clone());
    let ticks = match &cli.input {
        Some(path) => load_history(path)?,
        None => {
            let client = HyperliquidClient::from_config(&cfg)?;
            info!("Fetching {} {} candles for {} from {}...", cli.candles, interval, s.symbol, cfg.rest_url);
            fetch_warmup_ticks(&client, &s.symbol, &interval, cli.candles).await?
        }
    };
    if ticks.is_empty() {
        bail!("No prices loaded.  Check the input file, symbol and interval.");
    }
    info!(
        "Loaded {} prices  ({} → {})",
        ticks.len(),
        ticks.first().map_or(0, |t| t.ts_ms),
        ticks.last().map_or(0, |t| t.ts_ms)
    );

    // ── Periods per year (for Sharpe annualisation) ──────────────────────
    let periods_per_year = interval_ms(&interval).map_or(525_600.0, |ms| MS_PER_YEAR / ms as f64);

    // ── Run ──────────────────────────────────────────────────────────────
    let bt_cfg = BacktestConfig { verbose: cli.verbose, periods_per_year, close_at_end: true };
    if cli.sweep {
        let (entries, exits) = (cli.entries.clone(), cli.exits.clone());
        let rows = tokio::task::spawn_blocking(move || sweep(&ticks, &cfg, &bt_cfg, &entries, &exits)).await?;
        print_sweep(&rows, cli.top);
        if let Some(best) = rows.first() {
            println!("\nBest: entry_z={:.2} exit_z={:.2}", best.entry_z, best.exit_z);
            println!("{}", best.result.report);
        }
        return Ok(());
    }

    let result = replay(&ticks, cfg, &bt_cfg).await?;

    // ── Report ───────────────────────────────────────────────────────────
    println!("\n{}", result.summary);
    println!("{}", result.report);
    info!(
        "Signals: {}  orders: {}  skipped: {}",
        result.signals, result.executor.total_orders, result.executor.skipped_count
    );
    Ok(())
}
