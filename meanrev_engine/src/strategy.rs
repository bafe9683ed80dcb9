/// strategy.rs — Rolling Z-score mean-reversion strategy
///
/// Decision policy on every evaluation (window must be full):
///
///   flat        and Z ≤ −z_entry  →  BUY   (expect reversion up)
///   flat        and Z ≥ +z_entry  →  SELL  (expect reversion down)
///   in position and |Z| ≤ z_exit  →  EXIT
///   otherwise                     →  HOLD
///
/// Entries inside the cooldown window are downgraded to HOLD.
use tracing::{debug, info};

use crate::config::StrategyConfig;
use crate::error::StrategyError;
use crate::models::flow::{FlowSnapshot, FlowTracker};
use crate::models::rolling::{RollingWindow, WindowStats};
use crate::models::{PositionSide, PriceTick, Signal, SignalAction};
use crate::risk::{confidence, PositionSizer, SignalCooldown};

pub struct StrategyEngine {
    cfg: StrategyConfig,
    window: RollingWindow,
    flow: FlowTracker,
    sizer: PositionSizer,
    cooldown: SignalCooldown,
    position: PositionSide,
    last_ts_ms: i64,
    pub ticks_seen: u64,
}

impl StrategyEngine {
    pub fn new(cfg: StrategyConfig) -> Self {
        Self {
            window: RollingWindow::new(cfg.lookback_period),
            flow: FlowTracker::new(cfg.flow_window),
            sizer: PositionSizer::from_config(&cfg),
            cooldown: SignalCooldown::new(cfg.signal_cooldown),
            position: PositionSide::Flat,
            last_ts_ms: 0,
            ticks_seen: 0,
            cfg,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.cfg
    }

    pub fn symbol(&self) -> &str {
        &self.cfg.symbol
    }

    /// Append a price with the current wall-clock time.
    pub fn update_price(&mut self, price: f64, notional: f64) -> Result<(), StrategyError> {
        let ts_ms = chrono::Utc::now().timestamp_millis();
        self.update_tick(&PriceTick::new(ts_ms, price, notional))
    }

    /// Append a tick.  Malformed prices are rejected and leave the window untouched.
    pub fn update_tick(&mut self, tick: &PriceTick) -> Result<(), StrategyError> {
        if !tick.price.is_finite() || tick.price <= 0.0 {
            return Err(StrategyError::InvalidPrice(tick.price));
        }
        self.window.push(tick.price);
        if tick.notional.is_finite() && tick.notional >= 0.0 {
            self.flow.push(tick);
        }
        self.last_ts_ms = self.last_ts_ms.max(tick.ts_ms);
        self.ticks_seen += 1;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.window.is_full()
    }

    pub fn stats(&self) -> Option<WindowStats> {
        self.window.stats()
    }

    pub fn flow(&self) -> FlowSnapshot {
        self.flow.snapshot()
    }

    pub fn position(&self) -> PositionSide {
        self.position
    }

    /// Tell the engine which side the ledger holds after a fill.
    pub fn sync_position(&mut self, side: PositionSide) {
        if side != self.position {
            debug!("{} position {} → {}", self.cfg.symbol, self.position, side);
        }
        self.position = side;
    }

    /// Evaluate the window at the latest tick time.
    pub fn generate_signal(&mut self) -> Signal {
        self.generate_signal_at(self.last_ts_ms)
    }

    pub fn generate_signal_at(&mut self, now_ms: i64) -> Signal {
        let last = self.window.last().unwrap_or(0.0);
        let Some(stats) = self.window.stats() else {
            return Signal::hold(
                &self.cfg.symbol,
                last,
                now_ms,
                self.position,
                format!("warming up ({}/{})", self.window.len(), self.window.capacity()),
            );
        };

        let z = stats.z_score;
        let entry = self.cfg.entry_z_score;
        let exit = self.cfg.exit_z_score;

        let (mut action, mut reason) = match self.position {
            PositionSide::Flat if z <= -entry => (
                SignalAction::Buy,
                format!("Z {z:.2} <= -{entry:.2}: price {:.2} below mean {:.2}", stats.last, stats.mean),
            ),
            PositionSide::Flat if z >= entry => (
                SignalAction::Sell,
                format!("Z {z:.2} >= {entry:.2}: price {:.2} above mean {:.2}", stats.last, stats.mean),
            ),
            PositionSide::Long | PositionSide::Short if z.abs() <= exit => (
                SignalAction::Exit,
                format!("|Z| {:.2} <= {exit:.2}: reverted to mean {:.2}", z.abs(), stats.mean),
            ),
            _ => (SignalAction::Hold, format!("Z {z:.2} inside thresholds")),
        };

        if action.is_entry() {
            if self.cooldown.is_active(now_ms) {
                reason = format!(
                    "cooldown ({}s left), suppressed {action}: {reason}",
                    self.cooldown.remaining_ms(now_ms) / 1000
                );
                action = SignalAction::Hold;
            } else {
                self.cooldown.record(now_ms);
            }
        }

        let signal = Signal {
            symbol: self.cfg.symbol.clone(),
            action,
            z_score: z,
            confidence: confidence(z, entry),
            reason,
            price: stats.last,
            rsi: Some(stats.rsi),
            volatility: Some(stats.volatility),
            ts_ms: now_ms,
            position: self.position,
        };

        if signal.action != SignalAction::Hold {
            info!(
                symbol = %signal.symbol,
                z = signal.z_score,
                confidence = signal.confidence,
                rsi = stats.rsi,
                "{} signal: {}",
                signal.action,
                signal.reason
            );
        }
        signal
    }

    /// USD notional for a signal, `None` when it should not trade.
    pub fn calculate_position_size(&self, signal: &Signal) -> Option<f64> {
        if !signal.action.is_entry() {
            return None;
        }
        self.sizer.size_for(signal.confidence)
    }

    /// Clear the rolling window (e.g. after a feed gap).
    pub fn reset_window(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine(entry: f64, exit: f64) -> StrategyEngine {
        StrategyEngine::new(StrategyConfig {
            entry_z_score: entry,
            exit_z_score: exit,
            signal_cooldown: Duration::from_secs(60),
            ..StrategyConfig::default()
        })
    }

    fn feed(e: &mut StrategyEngine, ts_ms: i64, price: f64) {
        e.update_tick(&PriceTick::new(ts_ms, price, price)).unwrap();
    }

    #[test]
    fn holds_until_window_full() {
        let mut e = engine(0.75, 0.25);
        for i in 0..11 {
            feed(&mut e, i, if i % 2 == 0 { 100.0 } else { 80.0 });
            let s = e.generate_signal();
            assert_eq!(s.action, SignalAction::Hold);
            assert!(s.reason.starts_with("warming up"));
        }
    }

    #[test]
    fn constant_prices_never_enter() {
        let mut e = engine(0.75, 0.25);
        for i in 0..50 {
            feed(&mut e, i * 1_000, 100.0);
            let s = e.generate_signal();
            assert_eq!(s.action, SignalAction::Hold);
            if e.is_ready() {
                assert_eq!(s.z_score, 0.0);
            }
        }
    }

    #[test]
    fn sharp_drop_triggers_buy() {
        let mut e = engine(0.75, 0.25);
        for i in 0..12 {
            feed(&mut e, i * 1_000, 100.0);
        }
        feed(&mut e, 12_000, 90.0);
        let s = e.generate_signal();
        assert_eq!(s.action, SignalAction::Buy);
        assert!(s.z_score < -0.75);
        assert!(s.confidence > 0.5 && s.confidence <= 1.0);
        assert_eq!(s.order_side(), Some(crate::models::OrderSide::Buy));
    }

    #[test]
    fn spike_triggers_sell() {
        let mut e = engine(0.75, 0.25);
        for i in 0..12 {
            feed(&mut e, i * 1_000, 100.0);
        }
        feed(&mut e, 12_000, 112.0);
        assert_eq!(e.generate_signal().action, SignalAction::Sell);
    }

    #[test]
    fn exit_when_reverted() {
        let mut e = engine(0.75, 0.25);
        for i in 0..12 {
            feed(&mut e, i * 1_000, 100.0);
        }
        e.sync_position(PositionSide::Long);
        let s = e.generate_signal();
        assert_eq!(s.action, SignalAction::Exit);
        assert_eq!(s.order_side(), Some(crate::models::OrderSide::Sell));
    }

    #[test]
    fn no_entry_while_in_position() {
        let mut e = engine(0.75, 0.25);
        for i in 0..12 {
            feed(&mut e, i * 1_000, 100.0);
        }
        e.sync_position(PositionSide::Short);
        feed(&mut e, 12_000, 90.0);
        assert_eq!(e.generate_signal().action, SignalAction::Hold);
    }

    #[test]
    fn cooldown_suppresses_second_entry() {
        let mut e = engine(0.75, 0.25);
        for i in 0..12 {
            feed(&mut e, i * 1_000, 100.0);
        }
        feed(&mut e, 12_000, 90.0);
        assert_eq!(e.generate_signal().action, SignalAction::Buy);
        // still flat (order not filled), another drop 10 s later
        feed(&mut e, 22_000, 80.0);
        let s = e.generate_signal();
        assert_eq!(s.action, SignalAction::Hold);
        assert!(s.reason.starts_with("cooldown"));
        // after the window the entry is allowed again
        feed(&mut e, 90_000, 70.0);
        assert_eq!(e.generate_signal().action, SignalAction::Buy);
    }

    #[test]
    fn rejects_bad_prices() {
        let mut e = engine(0.75, 0.25);
        assert!(matches!(e.update_price(f64::NAN, 1.0), Err(StrategyError::InvalidPrice(_))));
        assert_eq!(e.update_price(-1.0, 1.0), Err(StrategyError::InvalidPrice(-1.0)));
        assert!(e.update_price(0.0, 1.0).is_err());
        assert_eq!(e.ticks_seen, 0);
    }

    #[test]
    fn position_size_only_for_entries() {
        let mut e = engine(0.75, 0.25);
        for i in 0..12 {
            feed(&mut e, i * 1_000, 100.0);
        }
        let hold = e.generate_signal();
        assert_eq!(e.calculate_position_size(&hold), None);

        feed(&mut e, 12_000, 90.0);
        let buy = e.generate_signal();
        let size = e.calculate_position_size(&buy).unwrap();
        assert!(size <= e.config().max_position_usd);
        assert!(size >= e.config().min_order_usd);
    }
}
