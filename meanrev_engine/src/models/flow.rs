/// models/flow.rs — Cumulative Volume Delta (CVD) and rolling order-flow imbalance
///
/// ─────────────────────────────────────────────────────────────────────────
///   For each trade print:
///     signed notional  v_t = +notional  if buyer-initiated
///                      v_t = −notional  if seller-initiated
///
///   CVD_t = Σ_{s ≤ t} v_s               (unbounded running sum)
///
///   Rolling imbalance over the last W prints:
///     OFI_W = Σ_{t∈W} v_t / Σ_{t∈W} |v_t|      ∈ [−1, +1]
///
///   Prints without an aggressor side (replayed bars) only count towards
///   total volume.
/// ─────────────────────────────────────────────────────────────────────────

use std::collections::VecDeque;

use crate::models::{OrderSide, PriceTick};

/// Per-symbol order-flow counters.
#[derive(Debug, Clone)]
pub struct FlowTracker {
    window: usize,
    signed_buf: VecDeque<f64>,
    abs_buf: VecDeque<f64>,
    sum_signed: f64,
    sum_abs: f64,

    pub cvd: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub total_volume: f64,
    pub trade_count: u64,
}

/// Read-only copy of the tracker state for reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSnapshot {
    pub cvd: f64,
    pub imbalance: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub trade_count: u64,
}

impl FlowTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            signed_buf: VecDeque::with_capacity(window),
            abs_buf: VecDeque::with_capacity(window),
            sum_signed: 0.0,
            sum_abs: 0.0,
            cvd: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            total_volume: 0.0,
            trade_count: 0,
        }
    }

    pub fn push(&mut self, tick: &PriceTick) {
        self.trade_count += 1;
        self.total_volume += tick.notional;

        let Some(side) = tick.side else {
            return;
        };
        let signed = match side {
            OrderSide::Buy => {
                self.buy_volume += tick.notional;
                tick.notional
            }
            OrderSide::Sell => {
                self.sell_volume += tick.notional;
                -tick.notional
            }
        };
        self.cvd += signed;

        self.signed_buf.push_back(signed);
        self.abs_buf.push_back(tick.notional);
        self.sum_signed += signed;
        self.sum_abs += tick.notional;

        if self.signed_buf.len() > self.window {
            self.sum_signed -= self.signed_buf.pop_front().unwrap_or(0.0);
            self.sum_abs -= self.abs_buf.pop_front().unwrap_or(0.0);
        }
    }

    /// Rolling imbalance.  0 when no sided prints are stored.
    pub fn imbalance(&self) -> f64 {
        if self.sum_abs < 1e-12 {
            return 0.0;
        }
        (self.sum_signed / self.sum_abs).clamp(-1.0, 1.0)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            cvd: self.cvd,
            imbalance: self.imbalance(),
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            trade_count: self.trade_count,
        }
    }
}
