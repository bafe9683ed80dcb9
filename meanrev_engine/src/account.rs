/// account.rs — Paper trading ledger
///
/// Holds cash balance, one net position per symbol, the order book of the
/// account (pending / filled / cancelled) and an append-only trade log.
/// Everything in `get_account_summary` is derived from that history.
///
/// POSITION LIFECYCLE (per symbol)
///
///   FLAT ──fill──▶ OPEN ──same side──▶ ADDING   (size-weighted entry)
///                   │   ──opposite───▶ REDUCING (realize (exit − entry)·qty·dir)
///                   └── opposite = size ──▶ CLOSED ──▶ FLAT
///                       opposite > size ──▶ FLIPPED (remainder opens other side)
///
/// Margin model: cross, fixed leverage.  An exposure-increasing fill needs
///   notional / leverage ≤ balance − Σ size·entry / leverage
///
/// Orders resting on the exchange are mirrored with `track_resting` and only
/// fill once the mark trades through their limit.
///
/// The equity curve is sampled (at most one point per `EQUITY_SAMPLE_MS`
/// unless a fill happens); peak and max drawdown are tracked on every mark.
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, StoreError};
use crate::models::{OrderSide, PositionSide};

const SIZE_EPSILON: f64 = 1e-9;
const EQUITY_SAMPLE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// What caused an order (strategy name + signal confidence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTrigger {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperOrder {
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Base-asset quantity
    pub size: f64,
    /// Fill price for market orders when no mark is known yet
    pub reference_price: Option<f64>,
    pub trigger: Option<OrderTrigger>,
    pub status: OrderStatus,
    pub created_ms: i64,
    pub filled_ms: Option<i64>,
    pub fill_price: Option<f64>,
    /// Set when the order is resting on the exchange
    #[serde(default)]
    pub exchange_oid: Option<u64>,
}

impl PaperOrder {
    pub fn market(symbol: &str, side: OrderSide, size: f64) -> Self {
        Self::new(symbol, side, OrderType::Market, size)
    }

    pub fn limit(symbol: &str, side: OrderSide, size: f64, price: f64) -> Self {
        Self::new(symbol, side, OrderType::Limit { price }, size)
    }

    fn new(symbol: &str, side: OrderSide, order_type: OrderType, size: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_owned(),
            side,
            order_type,
            size,
            reference_price: None,
            trigger: None,
            status: OrderStatus::Pending,
            created_ms: chrono::Utc::now().timestamp_millis(),
            filled_ms: None,
            fill_price: None,
            exchange_oid: None,
        }
    }

    pub fn at_price(mut self, price: f64) -> Self {
        self.reference_price = Some(price);
        self
    }

    pub fn at_time(mut self, ts_ms: i64) -> Self {
        self.created_ms = ts_ms;
        self
    }

    pub fn with_trigger(mut self, name: impl Into<String>, confidence: f64) -> Self {
        self.trigger = Some(OrderTrigger { name: name.into(), confidence });
        self
    }

    pub fn with_exchange_oid(mut self, oid: u64) -> Self {
        self.exchange_oid = Some(oid);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Always ≥ 0; direction is in `side`
    pub size: f64,
    pub entry_price: f64,
    /// P&L realized by partial closes while this position was open
    pub realized_pnl: f64,
    pub opened_ms: i64,
    pub updated_ms: i64,
}

impl Position {
    fn direction(&self) -> f64 {
        match self.side {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
            PositionSide::Flat => 0.0,
        }
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        (mark - self.entry_price) * self.size * self.direction()
    }

    pub fn notional(&self, mark: f64) -> f64 {
        self.size * mark
    }
}

/// State transition caused by a single fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PositionEvent {
    Opened,
    Added,
    Reduced { realized: f64 },
    Closed { realized: f64 },
    Flipped { realized: f64 },
}

impl PositionEvent {
    pub fn realized(&self) -> Option<f64> {
        match *self {
            PositionEvent::Opened | PositionEvent::Added => None,
            PositionEvent::Reduced { realized }
            | PositionEvent::Closed { realized }
            | PositionEvent::Flipped { realized } => Some(realized),
        }
    }
}

/// Immutable record of one fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    /// Present when the fill reduced, closed or flipped a position
    pub realized_pnl: Option<f64>,
    pub ts_ms: i64,
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts_ms: i64,
    pub equity: f64,
}

/// Result of a fill applied to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: Uuid,
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    pub event: PositionEvent,
    pub position_after: PositionSide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub name: String,
    pub initial_balance: f64,
    pub balance: f64,
    pub available_balance: f64,
    pub equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub fees_paid: f64,
    pub total_pnl: f64,
    /// Fraction of initial balance
    pub total_pnl_pct: f64,
    pub trade_count: usize,
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    /// Fraction, ≤ 0
    pub max_drawdown: f64,
    pub open_positions: usize,
    pub pending_orders: usize,
}

impl fmt::Display for AccountSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  PAPER ACCOUNT — {}", self.name)?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Balance        : ${:.2}", self.balance)?;
        writeln!(f, "  Equity         : ${:.2}", self.equity)?;
        writeln!(f, "  Realized P&L   : ${:.2}", self.realized_pnl)?;
        writeln!(f, "  Unrealized P&L : ${:.2}", self.unrealized_pnl)?;
        writeln!(f, "  Fees           : ${:.2}", self.fees_paid)?;
        writeln!(f, "  Total P&L      : ${:.2} ({:+.2}%)", self.total_pnl, self.total_pnl_pct * 100.0)?;
        writeln!(f, "  Trades         : {} ({} closed)", self.trade_count, self.closed_trades)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Max Drawdown   : {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "  Open Positions : {}", self.open_positions)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperAccount {
    pub name: String,
    pub initial_balance: f64,
    /// Cash: initial + realized P&L − fees
    balance: f64,
    leverage: f64,
    fee_rate: f64,
    positions: AHashMap<String, Position>,
    marks: AHashMap<String, f64>,
    orders: Vec<PaperOrder>,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<EquityPoint>,
    #[serde(default)]
    peak_equity: f64,
    /// Fraction, ≤ 0
    #[serde(default)]
    max_drawdown: f64,
}

impl PaperAccount {
    pub fn new(name: impl Into<String>, initial_balance: f64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            name: name.into(),
            initial_balance,
            balance: initial_balance,
            leverage: 1.0,
            fee_rate: 0.0,
            positions: AHashMap::new(),
            marks: AHashMap::new(),
            orders: Vec::new(),
            trades: Vec::new(),
            equity_curve: vec![EquityPoint { ts_ms: now, equity: initial_balance }],
            peak_equity: initial_balance,
            max_drawdown: 0.0,
        }
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage.max(1.0);
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate.max(0.0);
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn used_margin(&self) -> f64 {
        self.positions
            .values()
            .map(|p| p.size * p.entry_price / self.leverage)
            .sum()
    }

    pub fn available_balance(&self) -> f64 {
        self.balance - self.used_margin()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn position_side(&self, symbol: &str) -> PositionSide {
        self.positions.get(symbol).map_or(PositionSide::Flat, |p| p.side)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn orders(&self) -> &[PaperOrder] {
        &self.orders
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &PaperOrder> {
        self.orders.iter().filter(|o| o.status == OrderStatus::Pending)
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn mark(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .map(|p| {
                let mark = self.marks.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.unrealized_pnl(mark)
            })
            .sum()
    }

    pub fn equity(&self) -> f64 {
        self.balance + self.unrealized_pnl()
    }

    // ── Orders ────────────────────────────────────────────────────────────

    /// Validate and submit an order.
    ///
    /// Market orders (and marketable limits) fill immediately; other limit
    /// orders rest until `update_prices` crosses them.  Returns the fill, or
    /// `None` when the order is resting.
    pub fn place_order(&mut self, mut order: PaperOrder) -> Result<Option<Fill>, LedgerError> {
        validate(&order)?;
        let mark = self.marks.get(&order.symbol).copied();

        let fill_price = match order.order_type {
            OrderType::Market => order
                .reference_price
                .or(mark)
                .ok_or_else(|| LedgerError::NoMarkPrice(order.symbol.clone()))?,
            OrderType::Limit { price } => match mark.or(order.reference_price) {
                Some(m) if crosses(order.side, price, m) => m,
                _ => {
                    debug!("Resting {} {} {} @ {:.4}", order.symbol, order.side, order.size, price);
                    self.orders.push(order);
                    return Ok(None);
                }
            },
        };

        self.check_margin(&order.symbol, order.side, order.size, fill_price)?;
        let ts = order.created_ms;
        let fill = self.apply_fill(&order, fill_price, ts);
        order.status = OrderStatus::Filled;
        order.filled_ms = Some(ts);
        order.fill_price = Some(fill_price);
        self.orders.push(order);
        Ok(Some(fill))
    }

    /// Record a fill that already happened elsewhere (e.g. on the exchange).
    /// Skips the margin check.
    pub fn record_fill(
        &mut self,
        mut order: PaperOrder,
        price: f64,
        ts_ms: i64,
    ) -> Result<Fill, LedgerError> {
        validate(&order)?;
        if !price.is_finite() || price <= 0.0 {
            return Err(LedgerError::InvalidOrder(format!("fill price {price}")));
        }
        let fill = self.apply_fill(&order, price, ts_ms);
        order.status = OrderStatus::Filled;
        order.filled_ms = Some(ts_ms);
        order.fill_price = Some(price);
        self.orders.push(order);
        Ok(fill)
    }

    /// Mirror an order the exchange accepted as resting.  It is stored as
    /// pending whatever the current mark, and fills only once the mark moves
    /// strictly through its limit.
    pub fn track_resting(&mut self, order: PaperOrder) -> Result<Uuid, LedgerError> {
        validate(&order)?;
        let OrderType::Limit { price } = order.order_type else {
            return Err(LedgerError::InvalidOrder("only limit orders can rest".into()));
        };
        debug!(
            "Tracking resting {} {} {} @ {:.4} (oid {:?})",
            order.symbol, order.side, order.size, price, order.exchange_oid
        );
        let id = order.id;
        self.orders.push(order);
        Ok(id)
    }

    pub fn cancel_order(&mut self, id: Uuid) -> Result<(), LedgerError> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(LedgerError::UnknownOrder(id))?;
        if order.status != OrderStatus::Pending {
            return Err(LedgerError::NotPending(id));
        }
        order.status = OrderStatus::Cancelled;
        info!("Cancelled order {} ({} {} {})", id, order.symbol, order.side, order.size);
        Ok(())
    }

    // ── Marks ─────────────────────────────────────────────────────────────

    pub fn update_prices(&mut self, prices: &HashMap<String, f64>) -> Vec<Fill> {
        self.update_prices_at(prices, chrono::Utc::now().timestamp_millis())
    }

    /// Store marks, fill crossed limit orders, append an equity point.
    pub fn update_prices_at(&mut self, prices: &HashMap<String, f64>, ts_ms: i64) -> Vec<Fill> {
        for (symbol, &price) in prices {
            if price.is_finite() && price > 0.0 {
                self.marks.insert(symbol.clone(), price);
            } else {
                warn!("Ignoring invalid mark {} for {}", price, symbol);
            }
        }

        let mut fills = Vec::new();
        for idx in 0..self.orders.len() {
            let order = &self.orders[idx];
            if order.status != OrderStatus::Pending {
                continue;
            }
            let OrderType::Limit { price: limit } = order.order_type else {
                continue;
            };
            let Some(&mark) = self.marks.get(&order.symbol) else {
                continue;
            };
            let crossed = if order.exchange_oid.is_some() {
                trades_through(order.side, limit, mark)
            } else {
                crosses(order.side, limit, mark)
            };
            if !crossed {
                continue;
            }

            let order = order.clone();
            match self.check_margin(&order.symbol, order.side, order.size, limit) {
                Ok(()) => {
                    fills.push(self.apply_fill(&order, limit, ts_ms));
                    let stored = &mut self.orders[idx];
                    stored.status = OrderStatus::Filled;
                    stored.filled_ms = Some(ts_ms);
                    stored.fill_price = Some(limit);
                }
                Err(e) => {
                    warn!("Cancelling limit order {}: {}", order.id, e);
                    self.orders[idx].status = OrderStatus::Cancelled;
                }
            }
        }

        self.record_equity(ts_ms, !fills.is_empty());
        fills
    }

    /// Single-symbol convenience wrapper around `update_prices_at`.
    pub fn update_price(&mut self, symbol: &str, price: f64, ts_ms: i64) -> Vec<Fill> {
        let mut prices = HashMap::with_capacity(1);
        prices.insert(symbol.to_owned(), price);
        self.update_prices_at(&prices, ts_ms)
    }

    // ── Summary ───────────────────────────────────────────────────────────

    pub fn get_account_summary(&self) -> AccountSummary {
        let realized_pnl: f64 = self.trades.iter().filter_map(|t| t.realized_pnl).sum();
        let fees_paid: f64 = self.trades.iter().map(|t| t.fee).sum();
        let closed_trades = self.trades.iter().filter(|t| t.realized_pnl.is_some()).count();
        let winning_trades = self
            .trades
            .iter()
            .filter(|t| t.realized_pnl.is_some_and(|p| p > 0.0))
            .count();
        let win_rate = if closed_trades == 0 {
            0.0
        } else {
            winning_trades as f64 / closed_trades as f64
        };

        let equity = self.equity();
        let total_pnl = equity - self.initial_balance;

        AccountSummary {
            name: self.name.clone(),
            initial_balance: self.initial_balance,
            balance: self.balance,
            available_balance: self.available_balance(),
            equity,
            realized_pnl,
            unrealized_pnl: self.unrealized_pnl(),
            fees_paid,
            total_pnl,
            total_pnl_pct: if self.initial_balance > 0.0 { total_pnl / self.initial_balance } else { 0.0 },
            trade_count: self.trades.len(),
            closed_trades,
            winning_trades,
            win_rate,
            max_drawdown: self.max_drawdown,
            open_positions: self.positions.len(),
            pending_orders: self.open_orders().count(),
        }
    }

    // ── Snapshot file ─────────────────────────────────────────────────────

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    // ── Internals ─────────────────────────────────────────────────────────

    /// Update peak / drawdown and append a curve point when equity moved and
    /// the sample interval elapsed (always on `force`).
    fn record_equity(&mut self, ts_ms: i64, force: bool) {
        let equity = self.equity();
        self.peak_equity = self.peak_equity.max(equity);
        if self.peak_equity > 0.0 {
            let dd = (equity - self.peak_equity) / self.peak_equity;
            self.max_drawdown = self.max_drawdown.min(dd);
        }
        let append = match self.equity_curve.last() {
            None => true,
            Some(last) if (equity - last.equity).abs() <= SIZE_EPSILON => false,
            Some(last) => force || ts_ms - last.ts_ms >= EQUITY_SAMPLE_MS,
        };
        if append {
            self.equity_curve.push(EquityPoint { ts_ms, equity });
        }
    }

    fn check_margin(&self, symbol: &str, side: OrderSide, size: f64, price: f64) -> Result<(), LedgerError> {
        let (added, released) = match self.positions.get(symbol) {
            Some(p) if p.side != PositionSide::from(side) => {
                let closed = size.min(p.size);
                ((size - p.size).max(0.0), closed * p.entry_price / self.leverage)
            }
            _ => (size, 0.0),
        };
        if added <= SIZE_EPSILON {
            return Ok(());
        }
        let required = added * price / self.leverage;
        let available = self.available_balance() + released;
        if required > available + 1e-9 {
            return Err(LedgerError::InsufficientBalance { required, available });
        }
        Ok(())
    }

    fn apply_fill(&mut self, order: &PaperOrder, price: f64, ts_ms: i64) -> Fill {
        let size = order.size;
        let fee = size * price * self.fee_rate;
        self.balance -= fee;

        let event = match self.positions.get_mut(&order.symbol) {
            None => {
                self.positions.insert(
                    order.symbol.clone(),
                    Position {
                        symbol: order.symbol.clone(),
                        side: order.side.into(),
                        size,
                        entry_price: price,
                        realized_pnl: 0.0,
                        opened_ms: ts_ms,
                        updated_ms: ts_ms,
                    },
                );
                PositionEvent::Opened
            }
            Some(p) if p.side == PositionSide::from(order.side) => {
                let new_size = p.size + size;
                p.entry_price = (p.entry_price * p.size + price * size) / new_size;
                p.size = new_size;
                p.updated_ms = ts_ms;
                PositionEvent::Added
            }
            Some(p) => {
                let closed = size.min(p.size);
                let realized = (price - p.entry_price) * closed * p.direction();
                self.balance += realized;

                if size < p.size - SIZE_EPSILON {
                    p.size -= size;
                    p.realized_pnl += realized;
                    p.updated_ms = ts_ms;
                    PositionEvent::Reduced { realized }
                } else if (size - p.size).abs() <= SIZE_EPSILON {
                    self.positions.remove(&order.symbol);
                    PositionEvent::Closed { realized }
                } else {
                    let remainder = size - p.size;
                    *p = Position {
                        symbol: order.symbol.clone(),
                        side: order.side.into(),
                        size: remainder,
                        entry_price: price,
                        realized_pnl: 0.0,
                        opened_ms: ts_ms,
                        updated_ms: ts_ms,
                    };
                    PositionEvent::Flipped { realized }
                }
            }
        };

        let trade = TradeRecord {
            id: Uuid::new_v4(),
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            size,
            price,
            fee,
            realized_pnl: event.realized(),
            ts_ms,
            trigger: order.trigger.as_ref().map(|t| t.name.clone()),
        };
        let trade_id = trade.id;
        self.trades.push(trade);
        self.marks.entry(order.symbol.clone()).or_insert(price);

        self.record_equity(ts_ms, true);

        let position_after = self.position_side(&order.symbol);
        info!(
            symbol = %order.symbol,
            side = %order.side,
            size,
            price,
            ?event,
            position = %position_after,
            "paper fill"
        );

        Fill {
            order_id: order.id,
            trade_id,
            symbol: order.symbol.clone(),
            side: order.side,
            size,
            price,
            fee,
            event,
            position_after,
        }
    }
}

fn validate(order: &PaperOrder) -> Result<(), LedgerError> {
    if order.symbol.trim().is_empty() {
        return Err(LedgerError::InvalidOrder("empty symbol".into()));
    }
    if !order.size.is_finite() || order.size <= 0.0 {
        return Err(LedgerError::InvalidOrder(format!("size {}", order.size)));
    }
    if let OrderType::Limit { price } = order.order_type {
        if !price.is_finite() || price <= 0.0 {
            return Err(LedgerError::InvalidOrder(format!("limit price {price}")));
        }
    }
    if order.status != OrderStatus::Pending {
        return Err(LedgerError::InvalidOrder(format!("status {}", order.status.as_str())));
    }
    Ok(())
}

/// Would a limit at `limit` execute against `mark`?
fn crosses(side: OrderSide, limit: f64, mark: f64) -> bool {
    match side {
        OrderSide::Buy => mark <= limit,
        OrderSide::Sell => mark >= limit,
    }
}

/// Queue position unknown: only a print beyond the limit guarantees a fill.
fn trades_through(side: OrderSide, limit: f64, mark: f64) -> bool {
    match side {
        OrderSide::Buy => mark < limit,
        OrderSide::Sell => mark > limit,
    }
}
