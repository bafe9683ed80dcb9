/// metrics.rs — Performance report for a finished session
///
/// A "trade" here is a fill that realized P&L (reduce, close or flip);
/// its return is `(realized − fee) / fill notional`.  Opening fills only
/// contribute their fee.
///
/// Ratios are annualised with `√(periods_per_year / n)` where `n` is the
/// number of trades, so a replay of `n` trades over a year of candles
/// scales like `n` independent draws.  Sortino uses the root mean square
/// of the negative returns.  Drawdown comes from the ledger, which tracks
/// peak equity on every mark rather than on the sampled curve.
use statrs::statistics::Statistics;

use crate::account::TradeRecord;

#[derive(Debug, Clone)]
pub struct PerfReport {
    pub n_trades:       usize,
    pub win_rate:       f64,
    pub avg_win:        f64,  // fraction of fill notional
    pub avg_loss:       f64,  // fraction of fill notional, positive
    pub profit_factor:  f64,
    pub total_return:   f64,  // fraction of initial capital
    pub sharpe:         f64,
    pub sortino:        f64,
    pub max_drawdown:   f64,  // non-positive fraction
    pub calmar:         f64,
    pub fees_paid:      f64,
    pub initial_equity: f64,
    pub final_equity:   f64,
}

impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  MEAN REVERSION — PERFORMANCE REPORT")?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Round Trips    : {}", self.n_trades)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Avg Win        : {:.4}%", self.avg_win * 100.0)?;
        writeln!(f, "  Avg Loss       : {:.4}%", self.avg_loss * 100.0)?;
        writeln!(f, "  Profit Factor  : {:.3}", self.profit_factor)?;
        writeln!(f, "  Total Return   : {:.2}%", self.total_return * 100.0)?;
        writeln!(f, "  Sharpe Ratio   : {:.3}", self.sharpe)?;
        writeln!(f, "  Sortino Ratio  : {:.3}", self.sortino)?;
        writeln!(f, "  Max Drawdown   : {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "  Calmar Ratio   : {:.3}", self.calmar)?;
        writeln!(f, "  Fees Paid      : ${:.2}", self.fees_paid)?;
        writeln!(f, "  Initial Equity : ${:.2}", self.initial_equity)?;
        writeln!(f, "  Final Equity   : ${:.2}", self.final_equity)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

fn trade_return(t: &TradeRecord) -> Option<f64> {
    let pnl = t.realized_pnl?;
    let notional = t.size * t.price;
    (notional > 0.0).then(|| (pnl - t.fee) / notional)
}

/// statrs yields NaN for too-short samples.
fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den.abs() < 1e-12 { f64::INFINITY } else { num / den }
}

pub fn compute_metrics(
    trades:           &[TradeRecord],
    initial_equity:   f64,
    final_equity:     f64,
    max_drawdown:     f64,
    periods_per_year: f64,
) -> PerfReport {
    let fees_paid: f64 = trades.iter().map(|t| t.fee).sum();
    let returns: Vec<f64> = trades.iter().filter_map(trade_return).collect();
    let n = returns.len();
    let total_return = if initial_equity > 0.0 {
        (final_equity - initial_equity) / initial_equity
    } else {
        0.0
    };
    let max_drawdown = max_drawdown.min(0.0);

    let mut report = PerfReport {
        n_trades: n,
        win_rate: 0.0,
        avg_win: 0.0,
        avg_loss: 0.0,
        profit_factor: 0.0,
        total_return,
        sharpe: 0.0,
        sortino: 0.0,
        max_drawdown,
        calmar: 0.0,
        fees_paid,
        initial_equity,
        final_equity,
    };
    if n == 0 {
        return report;
    }

    let (wins, losses): (Vec<f64>, Vec<f64>) = returns.iter().partition(|&&r| r > 0.0);
    report.win_rate = wins.len() as f64 / n as f64;
    report.avg_win = finite_or_zero(wins.iter().mean());
    report.avg_loss = finite_or_zero(losses.iter().map(|r| r.abs()).mean());
    report.profit_factor = ratio(
        report.win_rate * report.avg_win,
        (1.0 - report.win_rate) * report.avg_loss,
    );

    let scale = (periods_per_year / n as f64).sqrt();
    let r_mean = returns.iter().mean();
    let r_std = finite_or_zero(returns.iter().std_dev());
    report.sharpe = if r_std < 1e-12 { 0.0 } else { r_mean / r_std * scale };

    let downside = returns.iter().map(|&r| r.min(0.0)).quadratic_mean();
    report.sortino = ratio(r_mean, finite_or_zero(downside)) * scale;
    report.calmar = ratio(total_return, max_drawdown.abs());
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closing(pnl: f64, price: f64) -> TradeRecord {
        TradeRecord {
            id: uuid::Uuid::new_v4(),
            order_id: uuid::Uuid::new_v4(),
            symbol: "BTC".into(),
            side: crate::models::OrderSide::Sell,
            size: 1.0,
            price,
            fee: 0.0,
            realized_pnl: Some(pnl),
            ts_ms: 0,
            trigger: None,
        }
    }

    #[test]
    fn opening_fills_are_not_trades() {
        let mut open = closing(0.0, 100.0);
        open.realized_pnl = None;
        open.fee = 0.5;
        let report = compute_metrics(&[open], 100.0, 99.5, -0.005, 365.0);
        assert_eq!(report.n_trades, 0);
        assert_eq!(report.win_rate, 0.0);
        assert_eq!(report.fees_paid, 0.5);
        assert_eq!(report.max_drawdown, -0.005);
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let trades = vec![closing(10.0, 100.0), closing(-5.0, 100.0), closing(10.0, 100.0)];
        let report = compute_metrics(&trades, 1_000.0, 1_015.0, -0.005, 365.0);
        assert_eq!(report.n_trades, 3);
        assert!((report.win_rate - 2.0 / 3.0).abs() < 1e-12);
        // (2/3 · 0.10) / (1/3 · 0.05) = 4
        assert!((report.profit_factor - 4.0).abs() < 1e-9);
        assert!((report.avg_loss - 0.05).abs() < 1e-12);
        assert!((report.total_return - 0.015).abs() < 1e-12);
        assert!((report.calmar - 3.0).abs() < 1e-9);
        assert!(report.sharpe > 0.0);
    }

    #[test]
    fn single_trade_has_no_sharpe() {
        let report = compute_metrics(&[closing(10.0, 100.0)], 1_000.0, 1_010.0, 0.0, 365.0);
        assert_eq!(report.sharpe, 0.0);
        assert_eq!(report.profit_factor, f64::INFINITY);
        assert_eq!(report.sortino, f64::INFINITY);
        assert_eq!(report.calmar, f64::INFINITY);
    }

    #[test]
    fn positive_drawdown_input_is_clamped() {
        let report = compute_metrics(&[], 1_000.0, 1_000.0, 0.25, 365.0);
        assert_eq!(report.max_drawdown, 0.0);
    }
}
