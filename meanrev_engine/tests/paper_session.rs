use std::time::Duration;

use meanrev_engine::account::PaperAccount;
use meanrev_engine::backtest::{replay, BacktestConfig};
use meanrev_engine::config::{AppConfig, StrategyConfig};
use meanrev_engine::engine::TradingEngine;
use meanrev_engine::schedule::Shutdown;
use meanrev_engine::{PositionSide, PriceTick, SignalAction};
use tokio::sync::mpsc;

fn strategy() -> StrategyConfig {
    StrategyConfig {
        lookback_period: 20,
        entry_z_score: 1.5,
        exit_z_score: 0.25,
        signal_cooldown: Duration::from_secs(300),
        ..StrategyConfig::default()
    }
}

/// Flat around 100 with a spike up, then a dip, one minute apart.
fn spike_then_dip() -> Vec<PriceTick> {
    let mut prices: Vec<f64> = (0..25).map(|i| 100.0 + if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
    prices.push(108.0);
    prices.extend((0..30).map(|i| 100.0 + if i % 2 == 0 { 0.1 } else { -0.1 }));
    prices.push(92.0);
    prices.extend((0..30).map(|i| 100.0 + if i % 2 == 0 { 0.1 } else { -0.1 }));
    prices
        .into_iter()
        .enumerate()
        .map(|(i, p)| PriceTick::new(i as i64 * 60_000, p, p))
        .collect()
}

#[tokio::test]
async fn spike_is_shorted_and_dip_is_bought() {
    let mut engine = TradingEngine::paper(AppConfig::paper(strategy()));
    let mut actions = Vec::new();
    for tick in spike_then_dip() {
        if let Some(report) = engine.on_tick(tick).await {
            assert!(report.is_filled(), "{report:?}");
            actions.push(report.action);
        }
    }
    assert_eq!(
        actions,
        vec![SignalAction::Sell, SignalAction::Exit, SignalAction::Buy, SignalAction::Exit]
    );
    let summary = engine.account().get_account_summary();
    assert_eq!(summary.closed_trades, 2);
    assert_eq!(summary.open_positions, 0);
    assert!(summary.realized_pnl > 0.0);
}

#[tokio::test]
async fn replay_reports_the_same_session() {
    let result = replay(&spike_then_dip(), AppConfig::paper(strategy()), &BacktestConfig::default())
        .await
        .unwrap();
    assert_eq!(result.report.n_trades, 2);
    assert_eq!(result.signals, 4);
    assert_eq!(result.executor.total_orders, 4);
    assert!(result.report.total_return > 0.0);
    assert!(result.report.max_drawdown <= 0.0);
}

#[tokio::test]
async fn session_survives_restart_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("account.json");
    let mut cfg = AppConfig::paper(strategy());
    cfg.account_state_path = Some(path.clone());

    // first session stops right after the short entry
    let ticks = spike_then_dip();
    let (tx, rx) = mpsc::channel(ticks.len());
    for tick in &ticks[..26] {
        tx.send(*tick).await.unwrap();
    }
    drop(tx);
    let (_shutdown, signal) = Shutdown::new();
    let summary = TradingEngine::paper(cfg.clone()).run(rx, signal).await.unwrap();
    assert_eq!(summary.open_positions, 1);

    // second session resumes the short and closes it
    let account = PaperAccount::load_json(&path).unwrap();
    assert_eq!(account.position_side("BTC"), PositionSide::Short);
    let executor = meanrev_engine::executor::OrderExecutor::dry_run(cfg.strategy.min_order_usd);
    let mut engine = TradingEngine::new(cfg, executor, account);
    assert_eq!(engine.strategy().position(), PositionSide::Short);
    engine.warm_up(&ticks[..26]);
    let mut exit = None;
    for tick in &ticks[26..56] {
        if let Some(report) = engine.on_tick(*tick).await {
            exit = Some(report.action);
            break;
        }
    }
    assert_eq!(exit, Some(SignalAction::Exit));
    assert_eq!(engine.account().position_side("BTC"), PositionSide::Flat);
}
