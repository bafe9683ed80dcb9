/// engine.rs — Trading session
///
/// Owns strategy, executor and ledger; no locks.  Per tick:
///
///   tick ─▶ strategy.update_tick ─▶ ledger.update_price (fills resting limits)
///        ─▶ strategy.generate_signal ─▶ size (entry) / position notional (exit)
///        ─▶ executor.execute_signal ─▶ mirror fill into ledger
///        ─▶ strategy.sync_position(ledger side)
///
/// `run` drives this from the tick queue with a periodic performance
/// snapshot, and flushes the account (Postgres and/or JSON) on exit.
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::account::{AccountSummary, PaperAccount, PaperOrder};
use crate::config::{AppConfig, OrderKind};
use crate::error::{LedgerError, StoreError};
use crate::executor::{ExecutionReport, ExecutionStatus, OrderExecutor};
use crate::models::{PositionSide, PriceTick, Signal, SignalAction};
use crate::schedule::ShutdownSignal;
use crate::store::PostgresStore;
use crate::strategy::StrategyEngine;

pub const STRATEGY_NAME: &str = "zscore_mean_reversion";

pub struct TradingEngine {
    cfg:      AppConfig,
    strategy: StrategyEngine,
    executor: OrderExecutor,
    account:  PaperAccount,
    store:    Option<PostgresStore>,
    pub signals_emitted: u64,
}

impl TradingEngine {
    pub fn new(cfg: AppConfig, executor: OrderExecutor, account: PaperAccount) -> Self {
        let mut strategy = StrategyEngine::new(cfg.strategy.clone());
        strategy.sync_position(account.position_side(&cfg.strategy.symbol));
        Self { cfg, strategy, executor, account, store: None, signals_emitted: 0 }
    }

    /// Dry-run session with a fresh ledger built from the config.
    pub fn paper(cfg: AppConfig) -> Self {
        let account = PaperAccount::new(cfg.account_name.clone(), cfg.initial_balance)
            .with_leverage(cfg.leverage)
            .with_fee_rate(cfg.fee_rate);
        let executor = OrderExecutor::dry_run(cfg.strategy.min_order_usd);
        Self::new(cfg, executor, account)
    }

    pub fn with_store(mut self, store: PostgresStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn account(&self) -> &PaperAccount {
        &self.account
    }

    pub fn account_mut(&mut self) -> &mut PaperAccount {
        &mut self.account
    }

    pub fn strategy(&self) -> &StrategyEngine {
        &self.strategy
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    fn symbol(&self) -> &str {
        &self.cfg.strategy.symbol
    }

    /// Feed history into the window and marks without trading.
    pub fn warm_up(&mut self, ticks: &[PriceTick]) -> usize {
        let mut accepted = 0;
        for tick in ticks {
            if self.strategy.update_tick(tick).is_ok() {
                accepted += 1;
            }
        }
        if let Some(last) = ticks.last() {
            let symbol = self.cfg.strategy.symbol.clone();
            self.account.update_price(&symbol, last.price, last.ts_ms);
        }
        info!(
            "Warm-up: {} prices, window {}",
            accepted,
            if self.strategy.is_ready() { "ready" } else { "still filling" }
        );
        accepted
    }

    /// Compare the exchange position with the ledger (live mode only).
    pub async fn reconcile(&mut self) {
        match self.executor.fetch_position(&self.cfg.strategy.symbol).await {
            Ok(Some(remote)) => {
                let local = self.account.position_side(self.symbol());
                if remote.side != local {
                    warn!(
                        "{} exchange position {} {:.6} differs from ledger {}",
                        self.symbol(),
                        remote.side,
                        remote.size,
                        local
                    );
                } else {
                    info!("{} position reconciled: {}", self.symbol(), local);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Position reconciliation failed: {}", e),
        }
    }

    pub async fn on_tick(&mut self, tick: PriceTick) -> Option<ExecutionReport> {
        if let Err(e) = self.strategy.update_tick(&tick) {
            warn!("{}", e);
            return None;
        }
        let symbol = self.cfg.strategy.symbol.clone();

        let fills = self.account.update_price(&symbol, tick.price, tick.ts_ms);
        if !fills.is_empty() {
            self.strategy.sync_position(self.account.position_side(&symbol));
        }

        let signal = self.strategy.generate_signal();
        let notional = match signal.action {
            SignalAction::Hold => return None,
            SignalAction::Buy | SignalAction::Sell => match self.strategy.calculate_position_size(&signal) {
                Some(n) => n,
                None => {
                    debug!("{} suppressed: size below minimum", signal.action);
                    return None;
                }
            },
            SignalAction::Exit => match self.account.position(&symbol) {
                Some(p) => p.size * signal.price,
                None => {
                    self.strategy.sync_position(PositionSide::Flat);
                    return None;
                }
            },
        };
        self.signals_emitted += 1;

        let mut report = self.executor.execute_signal(&signal, notional).await;
        if let Err(e) = self.apply_report(&signal, &report) {
            warn!("Ledger rejected {} {:?}: {}", signal.action, report.status, e);
            self.executor.record_rejection(&report.status);
            report.status = ExecutionStatus::Failed(format!("ledger rejected: {e}"));
        }
        self.strategy.sync_position(self.account.position_side(&symbol));
        Some(report)
    }

    /// Mirror an execution into the ledger.
    fn apply_report(&mut self, signal: &Signal, report: &ExecutionReport) -> Result<(), LedgerError> {
        let Some(side) = report.side else { return Ok(()) };
        let ts = signal.ts_ms;
        match report.status {
            ExecutionStatus::Filled { size, price, oid } => {
                let size = self.exit_size(signal, size);
                let order = PaperOrder::market(&signal.symbol, side, size)
                    .at_price(price)
                    .at_time(ts)
                    .with_trigger(STRATEGY_NAME, signal.confidence);
                match oid {
                    // already executed on the exchange
                    Some(oid) => self.account.record_fill(order.with_exchange_oid(oid), price, ts).map(drop),
                    None => self.account.place_order(order).map(drop),
                }
            }
            ExecutionStatus::Resting { size, price, oid } => {
                let order = PaperOrder::limit(&signal.symbol, side, size, price)
                    .at_time(ts)
                    .with_trigger(STRATEGY_NAME, signal.confidence)
                    .with_exchange_oid(oid);
                self.account.track_resting(order)?;
                info!("Tracking resting order {} in ledger", oid);
                Ok(())
            }
            ExecutionStatus::Skipped(_) | ExecutionStatus::Failed(_) => Ok(()),
        }
    }

    /// Snap an EXIT fill to the ledger's position size to avoid dust.
    fn exit_size(&self, signal: &Signal, filled: f64) -> f64 {
        if signal.action != SignalAction::Exit {
            return filled;
        }
        match self.account.position(&signal.symbol) {
            Some(p) if (p.size - filled).abs() <= p.size * 1e-9 => p.size,
            Some(p) => filled.min(p.size),
            None => filled,
        }
    }

    /// Log (and store) a performance snapshot.
    pub async fn snapshot(&mut self) -> AccountSummary {
        let summary = self.account.get_account_summary();
        let stats = self.executor.stats();
        let flow = self.strategy.flow();
        info!(
            equity = summary.equity,
            balance = summary.balance,
            realized = summary.realized_pnl,
            unrealized = summary.unrealized_pnl,
            trades = summary.trade_count,
            win_rate = summary.win_rate,
            max_dd = summary.max_drawdown,
            orders = stats.total_orders,
            errors = stats.error_count,
            cvd = flow.cvd,
            imbalance = flow.imbalance,
            "snapshot"
        );
        if let Some(store) = &self.store {
            let ts = chrono::Utc::now().timestamp_millis();
            if let Err(e) = store.insert_snapshot(&summary, ts).await {
                error!("Snapshot insert failed: {}", e);
            }
        }
        summary
    }

    /// Persist the account to every configured sink.  All sinks are tried;
    /// the first error is returned.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        let mut first_err = None;
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.flush(&self.account).await {
                error!("Postgres flush failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        if let Some(path) = &self.cfg.account_state_path {
            match self.account.save_json(path) {
                Ok(()) => info!("Account state written to {}", path.display()),
                Err(e) => {
                    error!("Writing {} failed: {}", path.display(), e);
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Consume ticks until the queue closes or shutdown fires.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<PriceTick>,
        mut shutdown: ShutdownSignal,
    ) -> anyhow::Result<AccountSummary> {
        let period = if self.cfg.snapshot_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            self.cfg.snapshot_interval
        };
        let mut snapshots = tokio::time::interval(period);
        snapshots.tick().await;

        info!(
            "Session started: {} lookback={} entry_z={} exit_z={} mode={} orders={:?}",
            self.symbol(),
            self.cfg.strategy.lookback_period,
            self.cfg.strategy.entry_z_score,
            self.cfg.strategy.exit_z_score,
            if self.executor.is_dry_run() { "dry-run" } else { "live" },
            if self.executor.is_dry_run() { OrderKind::Market } else { self.cfg.order_kind },
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Shutdown requested");
                    break;
                }
                maybe = rx.recv() => match maybe {
                    Some(tick) => {
                        self.on_tick(tick).await;
                    }
                    None => {
                        info!("Tick queue closed");
                        break;
                    }
                },
                _ = snapshots.tick() => {
                    self.snapshot().await;
                }
            }
        }

        let summary = self.snapshot().await;
        self.flush().await?;
        let stats = self.executor.stats();
        info!(
            "Session ended: {} ticks, {} signals, {} orders ({:.1}% ok)",
            self.strategy.ticks_seen,
            self.signals_emitted,
            stats.total_orders,
            stats.success_rate * 100.0
        );
        Ok(summary)
    }
}
