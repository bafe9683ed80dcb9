/// executor.rs — Signal → order
///
/// Dry-run fills instantly at the signal price.  Live mode sends a signed
/// order to Hyperliquid and reports whatever the exchange answered; a
/// rejection is counted, never retried and never raised.
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::{AppConfig, OrderKind};
use crate::error::ExchangeError;
use crate::exchange::{ExchangePosition, HyperliquidClient, OrderOutcome, OrderRequestKind};
use crate::models::{OrderSide, Signal, SignalAction};

pub enum ExecutionMode {
    DryRun,
    Live(HyperliquidClient),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    Filled { size: f64, price: f64, oid: Option<u64> },
    Resting { oid: u64, size: f64, price: f64 },
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub symbol:      String,
    pub action:      SignalAction,
    pub side:        Option<OrderSide>,
    pub reduce_only: bool,
    pub status:      ExecutionStatus,
    pub latency:     Duration,
}

impl ExecutionReport {
    pub fn is_filled(&self) -> bool {
        matches!(self.status, ExecutionStatus::Filled { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExecutorStats {
    pub total_orders:  u64,
    pub success_count: u64,
    pub error_count:   u64,
    pub skipped_count: u64,
    pub resting_count: u64,
    pub success_rate:  f64,
}

pub struct OrderExecutor {
    mode:          ExecutionMode,
    order_kind:    OrderKind,
    slippage:      f64,
    min_order_usd: f64,
    stats:         ExecutorStats,
}

impl OrderExecutor {
    pub fn dry_run(min_order_usd: f64) -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            order_kind: OrderKind::Market,
            slippage: 0.0,
            min_order_usd,
            stats: ExecutorStats::default(),
        }
    }

    pub fn live(client: HyperliquidClient, order_kind: OrderKind, slippage: f64, min_order_usd: f64) -> Self {
        Self {
            mode: ExecutionMode::Live(client),
            order_kind,
            slippage,
            min_order_usd,
            stats: ExecutorStats::default(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ExchangeError> {
        if cfg.dry_run {
            info!("Executor: DRY RUN (fills simulated at signal price)");
            return Ok(Self::dry_run(cfg.strategy.min_order_usd));
        }
        let client = HyperliquidClient::from_config(cfg)?;
        info!(
            "Executor: LIVE on {} ({:?} orders)",
            if cfg.use_testnet { "testnet" } else { "mainnet" },
            cfg.order_kind
        );
        Ok(Self::live(client, cfg.order_kind, cfg.market_slippage, cfg.strategy.min_order_usd))
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self.mode, ExecutionMode::DryRun)
    }

    pub fn client(&self) -> Option<&HyperliquidClient> {
        match &self.mode {
            ExecutionMode::Live(c) => Some(c),
            ExecutionMode::DryRun => None,
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let mut s = self.stats;
        s.success_rate = if s.total_orders == 0 {
            0.0
        } else {
            s.success_count as f64 / s.total_orders as f64
        };
        s
    }

    /// Reclassify the last success as an error after the ledger refused it.
    pub fn record_rejection(&mut self, status: &ExecutionStatus) {
        match status {
            ExecutionStatus::Filled { .. } => {}
            ExecutionStatus::Resting { .. } => {
                self.stats.resting_count = self.stats.resting_count.saturating_sub(1);
            }
            ExecutionStatus::Skipped(_) | ExecutionStatus::Failed(_) => return,
        }
        self.stats.success_count = self.stats.success_count.saturating_sub(1);
        self.stats.error_count += 1;
    }

    /// Exchange position for reconciliation, `None` in dry-run.
    pub async fn fetch_position(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        match &self.mode {
            ExecutionMode::DryRun => Ok(None),
            ExecutionMode::Live(client) => client.position(symbol).await.map(Some),
        }
    }

    /// Execute a signal for `notional_usd`.  For EXIT pass the notional of
    /// the open position; it is sent reduce-only and skips the minimum check.
    pub async fn execute_signal(&mut self, signal: &Signal, notional_usd: f64) -> ExecutionReport {
        let started = Instant::now();
        let side = signal.order_side();
        let reduce_only = signal.is_reduce_only();

        let status = match self.precheck(signal, side, notional_usd) {
            Err(reason) => {
                self.stats.skipped_count += 1;
                ExecutionStatus::Skipped(reason)
            }
            Ok(side) => {
                self.stats.total_orders += 1;
                let size = notional_usd / signal.price;
                let status = self.submit(signal, side, size, reduce_only).await;
                match &status {
                    ExecutionStatus::Filled { .. } => self.stats.success_count += 1,
                    ExecutionStatus::Resting { .. } => {
                        self.stats.success_count += 1;
                        self.stats.resting_count += 1;
                    }
                    _ => self.stats.error_count += 1,
                }
                status
            }
        };

        let report = ExecutionReport {
            symbol: signal.symbol.clone(),
            action: signal.action,
            side,
            reduce_only,
            status,
            latency: started.elapsed(),
        };
        match &report.status {
            ExecutionStatus::Failed(reason) => error!("{} {} failed: {}", report.symbol, report.action, reason),
            ExecutionStatus::Skipped(reason) if signal.action != SignalAction::Hold => {
                warn!("{} {} skipped: {}", report.symbol, report.action, reason)
            }
            _ => {}
        }
        report
    }

    fn precheck(&self, signal: &Signal, side: Option<OrderSide>, notional_usd: f64) -> Result<OrderSide, String> {
        let Some(side) = side else {
            return Err(format!("{} signal places no order", signal.action));
        };
        if !signal.price.is_finite() || signal.price <= 0.0 {
            return Err(format!("no valid price ({})", signal.price));
        }
        if !notional_usd.is_finite() || notional_usd <= 0.0 {
            return Err(format!("nothing to trade (notional {notional_usd:.2})"));
        }
        if signal.action.is_entry() && notional_usd < self.min_order_usd {
            return Err(format!(
                "notional ${notional_usd:.2} below minimum ${:.2}",
                self.min_order_usd
            ));
        }
        Ok(side)
    }

    async fn submit(&self, signal: &Signal, side: OrderSide, size: f64, reduce_only: bool) -> ExecutionStatus {
        let client = match &self.mode {
            ExecutionMode::DryRun => {
                info!("[DRY RUN] {} {:.6} {} @ {:.4}", side, size, signal.symbol, signal.price);
                return ExecutionStatus::Filled { size, price: signal.price, oid: None };
            }
            ExecutionMode::Live(client) => client,
        };

        let kind = match self.order_kind {
            OrderKind::Market => OrderRequestKind::Market { slippage: self.slippage },
            OrderKind::Limit => OrderRequestKind::Limit,
        };
        match client
            .place_order(&signal.symbol, side, size, signal.price, kind, reduce_only)
            .await
        {
            Ok(OrderOutcome::Filled { oid, size, avg_price }) => {
                info!("Order filled: oid={} {} {} @ {}", oid, side, size, avg_price);
                ExecutionStatus::Filled { size, price: avg_price, oid: Some(oid) }
            }
            Ok(OrderOutcome::Resting { oid }) => {
                info!("Order resting: oid={}", oid);
                ExecutionStatus::Resting { oid, size, price: signal.price }
            }
            Ok(OrderOutcome::Rejected(reason)) => ExecutionStatus::Failed(reason),
            Err(e) => ExecutionStatus::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;

    fn signal(action: SignalAction, position: PositionSide) -> Signal {
        Signal {
            symbol: "BTC".into(),
            action,
            z_score: -1.5,
            confidence: 1.0,
            reason: "test".into(),
            price: 50_000.0,
            rsi: None,
            volatility: None,
            ts_ms: 0,
            position,
        }
    }

    #[tokio::test]
    async fn dry_run_fills_at_signal_price() {
        let mut ex = OrderExecutor::dry_run(10.0);
        let report = ex.execute_signal(&signal(SignalAction::Buy, PositionSide::Flat), 100.0).await;
        assert_eq!(
            report.status,
            ExecutionStatus::Filled { size: 0.002, price: 50_000.0, oid: None }
        );
        assert_eq!(report.side, Some(OrderSide::Buy));
        let stats = ex.stats();
        assert_eq!((stats.total_orders, stats.success_count), (1, 1));
        assert_eq!(stats.success_rate, 1.0);
    }

    #[tokio::test]
    async fn below_minimum_is_skipped() {
        let mut ex = OrderExecutor::dry_run(10.0);
        let report = ex.execute_signal(&signal(SignalAction::Sell, PositionSide::Flat), 5.0).await;
        assert!(matches!(report.status, ExecutionStatus::Skipped(_)));
        let stats = ex.stats();
        assert_eq!(stats.total_orders, 0);
        assert_eq!(stats.skipped_count, 1);
    }

    #[tokio::test]
    async fn exit_is_reduce_only_and_ignores_minimum() {
        let mut ex = OrderExecutor::dry_run(10.0);
        let report = ex.execute_signal(&signal(SignalAction::Exit, PositionSide::Short), 5.0).await;
        assert!(report.reduce_only);
        assert_eq!(report.side, Some(OrderSide::Buy));
        assert!(report.is_filled());
    }

    #[tokio::test]
    async fn hold_is_skipped() {
        let mut ex = OrderExecutor::dry_run(10.0);
        let report = ex.execute_signal(&signal(SignalAction::Hold, PositionSide::Flat), 100.0).await;
        assert!(matches!(report.status, ExecutionStatus::Skipped(_)));
        assert_eq!(ex.fetch_position("BTC").await.unwrap(), None);
    }

    #[tokio::test]
    async fn live_failure_is_counted_not_raised() {
        // nothing listens on port 9; the request fails fast
        let client = HyperliquidClient::new("http://127.0.0.1:9", true).unwrap();
        let mut ex = OrderExecutor::live(client, OrderKind::Market, 0.05, 10.0);
        let report = ex.execute_signal(&signal(SignalAction::Buy, PositionSide::Flat), 100.0).await;
        assert!(matches!(report.status, ExecutionStatus::Failed(_)));
        let stats = ex.stats();
        assert_eq!((stats.total_orders, stats.error_count, stats.success_count), (1, 1, 0));
        assert_eq!(stats.success_rate, 0.0);
    }

    fn live_against(url: &str, kind: OrderKind) -> OrderExecutor {
        let client = HyperliquidClient::new(url, true)
            .unwrap()
            .with_private_key("0x0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap();
        OrderExecutor::live(client, kind, 0.05, 10.0)
    }

    #[tokio::test]
    async fn live_resting_order_is_reported() {
        use crate::exchange::stub;
        let url = stub::serve(stub::BTC_META, stub::RESTING).await;
        let mut ex = live_against(&url, OrderKind::Limit);
        let report = ex.execute_signal(&signal(SignalAction::Buy, PositionSide::Flat), 100.0).await;
        assert_eq!(report.status, ExecutionStatus::Resting { oid: 7, size: 0.002, price: 50_000.0 });
        assert!(!report.is_filled());
        let stats = ex.stats();
        assert_eq!((stats.total_orders, stats.success_count, stats.resting_count), (1, 1, 1));
    }

    #[tokio::test]
    async fn live_fill_carries_exchange_numbers() {
        use crate::exchange::stub;
        let url = stub::serve(stub::BTC_META, stub::FILLED).await;
        let mut ex = live_against(&url, OrderKind::Market);
        let report = ex.execute_signal(&signal(SignalAction::Buy, PositionSide::Flat), 100.0).await;
        assert_eq!(report.status, ExecutionStatus::Filled { size: 1.11111, price: 90.0, oid: Some(8) });
        let stats = ex.stats();
        assert_eq!((stats.success_count, stats.resting_count, stats.error_count), (1, 0, 0));
    }

    #[tokio::test]
    async fn rejection_moves_success_to_error() {
        let mut ex = OrderExecutor::dry_run(10.0);
        let report = ex.execute_signal(&signal(SignalAction::Buy, PositionSide::Flat), 100.0).await;
        ex.record_rejection(&report.status);
        let stats = ex.stats();
        assert_eq!((stats.total_orders, stats.success_count, stats.error_count), (1, 0, 1));

        ex.record_rejection(&ExecutionStatus::Skipped("hold".into()));
        assert_eq!(ex.stats().error_count, 1);
    }
}
