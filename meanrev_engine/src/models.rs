pub mod flow;
pub mod rolling;

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single trade print from the feed (or a replayed close price).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Unix timestamp in milliseconds
    pub ts_ms: i64,
    pub price: f64,
    /// price × size in quote currency (USD)
    pub notional: f64,
    /// Aggressor side; `None` for replayed bars
    pub side: Option<OrderSide>,
}

impl PriceTick {
    pub fn new(ts_ms: i64, price: f64, notional: f64) -> Self {
        Self { ts_ms, price, notional, side: None }
    }

    pub fn with_side(mut self, side: OrderSide) -> Self {
        self.side = Some(side);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, −1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    #[default]
    Flat,
}

impl PositionSide {
    pub fn is_flat(self) -> bool {
        self == PositionSide::Flat
    }

    /// Order side that closes this position.
    pub fn closing_side(self) -> Option<OrderSide> {
        match self {
            PositionSide::Long => Some(OrderSide::Sell),
            PositionSide::Short => Some(OrderSide::Buy),
            PositionSide::Flat => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
            PositionSide::Flat => "flat",
        }
    }
}

impl From<OrderSide> for PositionSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Exit,
    Hold,
}

impl SignalAction {
    pub fn is_entry(self) -> bool {
        matches!(self, SignalAction::Buy | SignalAction::Sell)
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Exit => "EXIT",
            SignalAction::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// Output of one strategy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub z_score: f64,
    /// ∈ [0, 1]
    pub confidence: f64,
    pub reason: String,
    /// Last price in the rolling window
    pub price: f64,
    pub rsi: Option<f64>,
    /// std / mean of the window
    pub volatility: Option<f64>,
    pub ts_ms: i64,
    /// Position the engine believed it held when the signal was produced
    pub position: PositionSide,
}

impl Signal {
    pub fn hold(symbol: &str, price: f64, ts_ms: i64, position: PositionSide, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_owned(),
            action: SignalAction::Hold,
            z_score: 0.0,
            confidence: 0.0,
            reason: reason.into(),
            price,
            rsi: None,
            volatility: None,
            ts_ms,
            position,
        }
    }

    /// Side of the order this signal asks for, if any.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self.action {
            SignalAction::Buy => Some(OrderSide::Buy),
            SignalAction::Sell => Some(OrderSide::Sell),
            SignalAction::Exit => self.position.closing_side(),
            SignalAction::Hold => None,
        }
    }

    pub fn is_reduce_only(&self) -> bool {
        self.action == SignalAction::Exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_closes_the_held_side() {
        let mut s = Signal::hold("BTC", 100.0, 0, PositionSide::Long, "");
        s.action = SignalAction::Exit;
        assert_eq!(s.order_side(), Some(OrderSide::Sell));
        s.position = PositionSide::Short;
        assert_eq!(s.order_side(), Some(OrderSide::Buy));
        s.position = PositionSide::Flat;
        assert_eq!(s.order_side(), None);
    }

    #[test]
    fn hold_has_no_order_side() {
        let s = Signal::hold("ETH", 1.0, 0, PositionSide::Flat, "warming up");
        assert_eq!(s.order_side(), None);
        assert!(!s.is_reduce_only());
    }
}
