/// backtest.rs — Historical replay through a dry-run session
///
/// Each price is fed to `TradingEngine::on_tick` exactly as the live feed
/// would deliver it, so the backtest exercises the same strategy, executor
/// and ledger code as the live trader.
///
/// ARCHITECTURE
/// ┌─────────────────────────────────────────────────────┐
/// │  Price history (Vec<PriceTick>)                     │
/// │        │                                            │
/// │        ▼                                            │
/// │  TradingEngine::on_tick                             │
/// │   ├─ StrategyEngine  (rolling Z, RSI, cooldown)     │
/// │   ├─ OrderExecutor   (dry-run fill @ signal price)  │
/// │   └─ PaperAccount    (positions, trades, equity)    │
/// │        │                                            │
/// │  force-close open position at last price            │
/// │        │                                            │
/// │  compute_metrics(trades, ledger drawdown)           │
/// └─────────────────────────────────────────────────────┘
///
/// `sweep` runs one independent replay per (entry_z, exit_z) pair on the
/// rayon pool.
use anyhow::{bail, Result};
use rayon::prelude::*;
use tracing::info;

use crate::account::{AccountSummary, PaperOrder};
use crate::config::AppConfig;
use crate::engine::TradingEngine;
use crate::executor::ExecutorStats;
use crate::metrics::{compute_metrics, PerfReport};
use crate::models::PriceTick;

/// Replay parameters (separate from strategy config).
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Log every execution (true) or only the summary (false)
    pub verbose: bool,
    /// Ticks per year (for annualisation in metrics)
    pub periods_per_year: f64,
    /// Close any open position at the last price
    pub close_at_end: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self { verbose: false, periods_per_year: 525_600.0, close_at_end: true }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub report:   PerfReport,
    pub summary:  AccountSummary,
    pub executor: ExecutorStats,
    pub signals:  u64,
}

/// Replay `ticks` through a fresh dry-run session.
pub async fn replay(ticks: &[PriceTick], cfg: AppConfig, bt_cfg: &BacktestConfig) -> Result<BacktestResult> {
    if ticks.len() < cfg.strategy.lookback_period {
        bail!(
            "Backtest needs at least {} prices, got {}",
            cfg.strategy.lookback_period,
            ticks.len()
        );
    }
    let symbol = cfg.strategy.symbol.clone();
    let mut engine = TradingEngine::paper(cfg);

    for tick in ticks {
        if let Some(report) = engine.on_tick(*tick).await {
            if bt_cfg.verbose {
                info!(
                    "  [{}] {} {:?} → {:?}",
                    tick.ts_ms, report.action, report.side, report.status
                );
            }
        }
    }

    if bt_cfg.close_at_end {
        force_close(&mut engine, &symbol, ticks);
    }

    let account = engine.account();
    let summary = account.get_account_summary();
    let report = compute_metrics(
        account.trades(),
        account.initial_balance,
        summary.equity,
        summary.max_drawdown,
        bt_cfg.periods_per_year,
    );
    Ok(BacktestResult {
        report,
        summary,
        executor: engine.executor().stats(),
        signals: engine.signals_emitted,
    })
}

fn force_close(engine: &mut TradingEngine, symbol: &str, ticks: &[PriceTick]) {
    let Some(last) = ticks.last() else { return };
    let Some((side, size)) = engine
        .account()
        .position(symbol)
        .and_then(|p| p.side.closing_side().map(|side| (side, p.size)))
    else {
        return;
    };
    info!("Closing {} {} {:.6} at last price {:.2}", symbol, side, size, last.price);
    let order = PaperOrder::market(symbol, side, size)
        .at_price(last.price)
        .at_time(last.ts_ms)
        .with_trigger("end_of_data", 0.0);
    if let Err(e) = engine.account_mut().place_order(order) {
        tracing::warn!("Final close failed: {}", e);
    }
}

/// Blocking wrapper for use outside a tokio runtime (e.g. rayon workers).
pub fn run_backtest(ticks: &[PriceTick], cfg: AppConfig, bt_cfg: &BacktestConfig) -> Result<BacktestResult> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
    rt.block_on(replay(ticks, cfg, bt_cfg))
}

#[derive(Debug, Clone)]
pub struct SweepRow {
    pub entry_z: f64,
    pub exit_z:  f64,
    pub result:  BacktestResult,
}

/// Evaluate every valid (entry, exit) pair in parallel; best total return first.
pub fn sweep(
    ticks: &[PriceTick],
    base: &AppConfig,
    bt_cfg: &BacktestConfig,
    entries: &[f64],
    exits: &[f64],
) -> Vec<SweepRow> {
    let grid: Vec<(f64, f64)> = entries
        .iter()
        .flat_map(|&e| exits.iter().map(move |&x| (e, x)))
        .filter(|&(e, x)| e > x && x >= 0.0)
        .collect();
    info!("Sweeping {} parameter pairs over {} prices", grid.len(), ticks.len());

    let bt_cfg = BacktestConfig { verbose: false, ..bt_cfg.clone() };
    let mut rows: Vec<SweepRow> = grid
        .par_iter()
        .filter_map(|&(entry_z, exit_z)| {
            let mut cfg = base.clone();
            cfg.strategy.entry_z_score = entry_z;
            cfg.strategy.exit_z_score = exit_z;
            match run_backtest(ticks, cfg, &bt_cfg) {
                Ok(result) => Some(SweepRow { entry_z, exit_z, result }),
                Err(e) => {
                    tracing::warn!("entry={} exit={} failed: {}", entry_z, exit_z, e);
                    None
                }
            }
        })
        .collect();
    rows.sort_by(|a, b| b.result.report.total_return.total_cmp(&a.result.report.total_return));
    rows
}

/// Print the sweep table (top N by total return).
pub fn print_sweep(rows: &[SweepRow], top_n: usize) {
    println!(
        "\n{:<8} {:<8} {:<8} {:<10} {:<10} {:<10}",
        "ENTRY", "EXIT", "TRADES", "WIN%", "RETURN%", "MAXDD%"
    );
    println!("{}", "─".repeat(58));
    for row in rows.iter().take(top_n) {
        let r = &row.result.report;
        println!(
            "{:<8.2} {:<8.2} {:<8} {:<10.2} {:<+10.4} {:<10.2}",
            row.entry_z,
            row.exit_z,
            r.n_trades,
            r.win_rate * 100.0,
            r.total_return * 100.0,
            r.max_drawdown * 100.0,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;

    /// 100 flat, a dip, recovery; repeated.
    fn oscillating(cycles: usize) -> Vec<PriceTick> {
        let mut ticks = Vec::new();
        let mut ts = 0;
        for _ in 0..cycles {
            for p in std::iter::repeat(100.0).take(12).chain([90.0]).chain(std::iter::repeat(100.0).take(14)) {
                ticks.push(PriceTick::new(ts, p, p));
                ts += 60_000;
            }
        }
        ticks
    }

    #[test]
    fn replay_round_trips_profitably() {
        let cfg = AppConfig::paper(StrategyConfig::default());
        let result = run_backtest(&oscillating(3), cfg, &BacktestConfig::default()).unwrap();
        assert_eq!(result.report.n_trades, 3);
        assert_eq!(result.summary.winning_trades, 3);
        assert!(result.report.total_return > 0.0);
        assert_eq!(result.summary.open_positions, 0);
    }

    #[test]
    fn too_short_history_is_rejected() {
        let cfg = AppConfig::paper(StrategyConfig::default());
        assert!(run_backtest(&oscillating(1)[..5], cfg, &BacktestConfig::default()).is_err());
    }

    #[test]
    fn sweep_skips_invalid_pairs_and_sorts() {
        let cfg = AppConfig::paper(StrategyConfig::default());
        let rows = sweep(&oscillating(2), &cfg, &BacktestConfig::default(), &[0.5, 0.75, 5.0], &[0.25, 0.75]);
        // (0.5,0.75) and (0.75,0.75) are invalid
        assert_eq!(rows.len(), 4);
        for pair in rows.windows(2) {
            assert!(pair[0].result.report.total_return >= pair[1].result.report.total_return);
        }
        // entry 5.0 never triggers
        let none = rows.iter().find(|r| r.entry_z == 5.0 && r.exit_z == 0.25).unwrap();
        assert_eq!(none.result.report.n_trades, 0);
    }
}
