use std::time::Duration;

use tracing::debug;

use crate::config::StrategyConfig;

/// Confidence-scaled position sizing.
///
/// notional = min(base · confidence, max); below `min_order` the order is
/// suppressed.
#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    pub base_usd: f64,
    pub max_usd: f64,
    pub min_order_usd: f64,
}

impl PositionSizer {
    pub fn new(base_usd: f64, max_usd: f64, min_order_usd: f64) -> Self {
        Self { base_usd, max_usd, min_order_usd }
    }

    pub fn from_config(cfg: &StrategyConfig) -> Self {
        Self::new(cfg.base_position_usd, cfg.max_position_usd, cfg.min_order_usd)
    }

    /// USD notional for a signal of the given confidence, `None` if suppressed.
    pub fn size_for(&self, confidence: f64) -> Option<f64> {
        let c = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        let notional = (self.base_usd * c).min(self.max_usd);
        if notional < self.min_order_usd || notional <= 0.0 {
            debug!("Sized notional {:.2} below minimum {:.2} — suppressed", notional, self.min_order_usd);
            return None;
        }
        Some(notional)
    }
}

/// Map |Z| to a confidence in [0, 1].
///
/// 0.5 at the entry threshold, 1.0 at twice the threshold.
pub fn confidence(z_score: f64, entry_z: f64) -> f64 {
    if !z_score.is_finite() || entry_z <= 0.0 {
        return 0.0;
    }
    (z_score.abs() / (2.0 * entry_z)).clamp(0.0, 1.0)
}

/// Time-based gate on entry signals.  Timestamps are tick times (ms).
#[derive(Debug, Clone)]
pub struct SignalCooldown {
    window_ms: i64,
    last_ms: Option<i64>,
}

impl SignalCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            last_ms: None,
        }
    }

    pub fn is_active(&self, now_ms: i64) -> bool {
        match self.last_ms {
            Some(last) => now_ms.saturating_sub(last) < self.window_ms,
            None => false,
        }
    }

    /// Milliseconds left until a new entry is allowed.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        match self.last_ms {
            Some(last) => (self.window_ms - now_ms.saturating_sub(last)).max(0),
            None => 0,
        }
    }

    pub fn record(&mut self, now_ms: i64) {
        self.last_ms = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.last_ms = None;
    }
}
