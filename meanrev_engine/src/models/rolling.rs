/// models/rolling.rs — Rolling price window and mean-reversion statistics
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// Window of the last N prices  P_1 … P_N  (N = lookback period).
///
/// ROLLING MEAN / SAMPLE STD
///
///   μ = (1/N) · Σ P_i
///   σ = √( Σ (P_i − μ)² / (N − 1) )
///
/// Z-SCORE (key signal, last price P_N):
///
///   Z = (P_N − μ) / σ          (Z = 0 when σ = 0)
///
///   Entry LONG:  Z ≤ −z_entry  (price far below rolling mean)
///   Entry SHORT: Z ≥ +z_entry  (price far above rolling mean)
///   Exit:        |Z| ≤ z_exit  (price back near the mean)
///
///   With the last price inside the window, |Z| ≤ (N − 1)/√N.
///
/// RSI over the same window (simple averages, N − 1 changes):
///
///   Δ_i = P_i − P_{i−1}
///   G = mean(max(Δ, 0)),  L = mean(max(−Δ, 0))
///   RSI = 100 − 100 / (1 + G/L)
///   L = 0 → RSI = 100 (or 50 when G = 0 too)
///
/// VOLATILITY (coefficient of variation):  v = σ / μ
/// ─────────────────────────────────────────────────────────────────────────

use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Snapshot of the window statistics at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
    pub last: f64,
    pub z_score: f64,
    pub rsi: f64,
    pub volatility: f64,
}

/// Fixed-capacity price buffer.  Evicts the oldest price once full.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    prices: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            prices: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, price: f64) {
        if self.prices.len() == self.capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.prices.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    pub fn clear(&mut self) {
        self.prices.clear();
    }

    /// Statistics over the full window.  `None` until the window is full.
    pub fn stats(&self) -> Option<WindowStats> {
        if !self.is_full() || self.capacity < 2 {
            return None;
        }
        let last = *self.prices.back()?;
        let mean = self.prices.iter().mean();
        let std_dev = self.prices.iter().std_dev();
        if !mean.is_finite() || !std_dev.is_finite() {
            return None;
        }

        let z_score = if std_dev < 1e-12 { 0.0 } else { (last - mean) / std_dev };
        let volatility = if mean.abs() < 1e-12 { 0.0 } else { std_dev / mean };

        Some(WindowStats {
            mean,
            std_dev,
            last,
            z_score,
            rsi: rsi(self.prices.iter().copied()),
            volatility,
        })
    }
}

/// Simple-average RSI over consecutive changes of `prices`.
pub fn rsi(prices: impl IntoIterator<Item = f64>) -> f64 {
    let mut prev: Option<f64> = None;
    let mut gains = 0.0;
    let mut losses = 0.0;
    let mut n = 0usize;
    for p in prices {
        if let Some(q) = prev {
            let d = p - q;
            if d > 0.0 {
                gains += d;
            } else {
                losses -= d;
            }
            n += 1;
        }
        prev = Some(p);
    }
    if n == 0 {
        return 50.0;
    }
    let avg_gain = gains / n as f64;
    let avg_loss = losses / n as f64;
    if avg_loss < 1e-12 {
        return if avg_gain < 1e-12 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_full() {
        let mut w = RollingWindow::new(12);
        for _ in 0..11 {
            w.push(100.0);
            assert!(w.stats().is_none());
        }
        w.push(100.0);
        assert!(w.stats().is_some());
    }

    #[test]
    fn constant_prices_have_zero_z() {
        let mut w = RollingWindow::new(12);
        for _ in 0..40 {
            w.push(250.0);
        }
        let s = w.stats().unwrap();
        assert_eq!(s.z_score, 0.0);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.rsi, 50.0);
    }

    #[test]
    fn sharp_drop_gives_large_negative_z() {
        let mut w = RollingWindow::new(12);
        for _ in 0..12 {
            w.push(100.0);
        }
        w.push(90.0);
        let s = w.stats().unwrap();
        // 11 × 100 + 90 → μ ≈ 99.167, σ ≈ 2.887, Z ≈ −3.175
        assert!((s.mean - 99.1667).abs() < 1e-3, "mean = {}", s.mean);
        assert!((s.z_score + 3.1754).abs() < 1e-3, "z = {}", s.z_score);
        assert_eq!(s.rsi, 0.0);
    }

    #[test]
    fn evicts_oldest() {
        let mut w = RollingWindow::new(3);
        for p in [1.0, 2.0, 3.0, 4.0] {
            w.push(p);
        }
        assert_eq!(w.len(), 3);
        let s = w.stats().unwrap();
        assert!((s.mean - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rsi_all_gains() {
        assert_eq!(rsi([1.0, 2.0, 3.0, 4.0]), 100.0);
        let mixed = rsi([10.0, 11.0, 10.0]);
        assert!((mixed - 50.0).abs() < 1e-9, "rsi = {mixed}");
    }
}
