/// wire.rs — Hyperliquid request / response shapes
///
/// Actions are typed structs so msgpack field order is fixed: the signed
/// hash covers the exact bytes, so `a,b,p,s,r,t` must serialize in that
/// order.
///
/// NUMBER FORMATTING
///   price : 5 significant figures, then at most (6 − szDecimals) decimals
///   size  : szDecimals decimals
///   wire  : fixed 8 decimals, trailing zeros stripped ("100.50000000" → "100.5")
use serde::{Deserialize, Serialize};

use crate::models::OrderSide;

/// Perp prices may carry at most this many decimals minus szDecimals.
const MAX_PERP_DECIMALS: u32 = 6;
const PRICE_SIG_FIGS: usize = 5;

// ── Actions (signed) ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    Gtc,
    Ioc,
    Alo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitWire {
    pub tif: Tif,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderTypeWire {
    Limit(LimitWire),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWire {
    /// Asset index in the perp universe
    pub a: u32,
    /// true = buy
    pub b: bool,
    pub p: String,
    pub s: String,
    /// reduce-only
    pub r: bool,
    pub t: OrderTypeWire,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelWire {
    pub a: u32,
    pub o: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Order {
        orders: Vec<OrderWire>,
        grouping: String,
    },
    Cancel {
        cancels: Vec<CancelWire>,
    },
}

impl Action {
    pub fn single_order(order: OrderWire) -> Self {
        Action::Order { orders: vec![order], grouping: "na".into() }
    }

    pub fn cancel(asset: u32, oid: u64) -> Self {
        Action::Cancel { cancels: vec![CancelWire { a: asset, o: oid }] }
    }
}

impl OrderWire {
    pub fn new(
        asset: u32,
        side: OrderSide,
        price: f64,
        size: f64,
        sz_decimals: u32,
        reduce_only: bool,
        tif: Tif,
    ) -> Self {
        Self {
            a: asset,
            b: side == OrderSide::Buy,
            p: float_to_wire(round_price(price, sz_decimals)),
            s: float_to_wire(round_size(size, sz_decimals)),
            r: reduce_only,
            t: OrderTypeWire::Limit(LimitWire { tif }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest<'a> {
    pub action: &'a Action,
    pub nonce: u64,
    pub signature: Signature,
    pub vault_address: Option<&'a str>,
}

// ── Rounding ──────────────────────────────────────────────────────────────

fn round_to(x: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (x * factor).round() / factor
}

pub fn round_price(price: f64, sz_decimals: u32) -> f64 {
    if !price.is_finite() || price <= 0.0 {
        return price;
    }
    // "{:.4e}" keeps 5 significant digits
    let sig: f64 = format!("{:.*e}", PRICE_SIG_FIGS - 1, price)
        .parse()
        .unwrap_or(price);
    round_to(sig, MAX_PERP_DECIMALS.saturating_sub(sz_decimals))
}

pub fn round_size(size: f64, sz_decimals: u32) -> f64 {
    round_to(size, sz_decimals)
}

pub fn float_to_wire(x: f64) -> String {
    let s = format!("{x:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" || s.is_empty() {
        "0".to_owned()
    } else {
        s.to_owned()
    }
}

/// Aggressive limit price for an IOC "market" order.
pub fn slippage_price(price: f64, side: OrderSide, slippage: f64, sz_decimals: u32) -> f64 {
    let px = match side {
        OrderSide::Buy => price * (1.0 + slippage),
        OrderSide::Sell => price * (1.0 - slippage),
    };
    round_price(px, sz_decimals)
}

// ── Exchange responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", content = "response", rename_all = "lowercase")]
pub enum ExchangeResponse {
    Ok(OkResponse),
    Err(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OkResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Option<StatusList>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusList {
    pub statuses: Vec<StatusWire>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusWire {
    Filled(FilledWire),
    Resting(RestingWire),
    Error(String),
    Success,
    WaitingForFill,
    WaitingForTrigger,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledWire {
    pub total_sz: String,
    pub avg_px: String,
    pub oid: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestingWire {
    pub oid: u64,
}

/// What happened to a single submitted order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled { oid: u64, size: f64, avg_price: f64 },
    Resting { oid: u64 },
    Rejected(String),
}

/// Reduce a raw `exchange` body to the outcome of its first order.
pub fn interpret_response(body: &str) -> OrderOutcome {
    let resp: ExchangeResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => return OrderOutcome::Rejected(format!("undecodable response ({e}): {body}")),
    };
    let ok = match resp {
        ExchangeResponse::Ok(ok) => ok,
        ExchangeResponse::Err(msg) => return OrderOutcome::Rejected(msg),
    };
    let Some(status) = ok.data.and_then(|d| d.statuses.into_iter().next()) else {
        return OrderOutcome::Rejected(format!("{} response without statuses", ok.kind));
    };
    match status {
        StatusWire::Filled(f) => match (f.total_sz.parse::<f64>(), f.avg_px.parse::<f64>()) {
            (Ok(size), Ok(avg_price)) => OrderOutcome::Filled { oid: f.oid, size, avg_price },
            _ => OrderOutcome::Rejected(format!("bad fill numbers {} @ {}", f.total_sz, f.avg_px)),
        },
        StatusWire::Resting(r) => OrderOutcome::Resting { oid: r.oid },
        StatusWire::Error(msg) => OrderOutcome::Rejected(msg),
        other => OrderOutcome::Rejected(format!("unexpected order status {other:?}")),
    }
}

// ── Info endpoint ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InfoRequest<'a> {
    Meta,
    ClearinghouseState { user: &'a str },
    CandleSnapshot { req: CandleRequest<'a> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleRequest<'a> {
    pub coin: &'a str,
    pub interval: &'a str,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<AssetMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
    pub margin_summary: Option<MarginSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: PositionWire,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionWire {
    pub coin: String,
    /// Signed size, negative = short
    pub szi: String,
    pub entry_px: Option<String>,
    pub unrealized_pnl: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleWire {
    /// Open time (ms)
    pub t: i64,
    pub o: String,
    pub h: String,
    pub l: String,
    pub c: String,
    pub v: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleWire {
    pub fn parse(&self) -> Option<Candle> {
        Some(Candle {
            open_ms: self.t,
            open: self.o.parse().ok()?,
            high: self.h.parse().ok()?,
            low: self.l.parse().ok()?,
            close: self.c.parse().ok()?,
            volume: self.v.parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_numbers_strip_zeros() {
        assert_eq!(float_to_wire(100.5), "100.5");
        assert_eq!(float_to_wire(42.0), "42");
        assert_eq!(float_to_wire(0.00012), "0.00012");
        assert_eq!(float_to_wire(-0.0), "0");
    }

    #[test]
    fn price_rounding_follows_sig_figs_and_decimals() {
        // BTC: szDecimals 5 → 1 price decimal, 5 sig figs
        assert_eq!(round_price(67_123.456, 5), 67_123.0);
        assert_eq!(round_price(1_891.437, 4), 1_891.4);
        // small coin: decimals cap wins
        assert_eq!(round_price(0.123456789, 0), 0.12346);
        assert_eq!(round_size(0.0012345, 3), 0.001);
    }

    #[test]
    fn market_orders_cross_by_slippage() {
        assert_eq!(slippage_price(100.0, OrderSide::Buy, 0.05, 2), 105.0);
        assert_eq!(slippage_price(100.0, OrderSide::Sell, 0.05, 2), 95.0);
    }

    #[test]
    fn order_action_json_shape() {
        let action = Action::single_order(OrderWire::new(0, OrderSide::Buy, 105.0, 0.25, 2, false, Tif::Ioc));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "order",
                "orders": [{"a": 0, "b": true, "p": "105", "s": "0.25", "r": false, "t": {"limit": {"tif": "Ioc"}}}],
                "grouping": "na",
            })
        );
    }

    #[test]
    fn filled_response() {
        let body = r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"filled":{"totalSz":"0.02","avgPx":"1891.4","oid":77738308}}]}}}"#;
        assert_eq!(
            interpret_response(body),
            OrderOutcome::Filled { oid: 77738308, size: 0.02, avg_price: 1891.4 }
        );
    }

    #[test]
    fn resting_response() {
        let body = r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"resting":{"oid":42}}]}}}"#;
        assert_eq!(interpret_response(body), OrderOutcome::Resting { oid: 42 });
    }

    #[test]
    fn rejections() {
        let err = r#"{"status":"err","response":"User or API Wallet does not exist."}"#;
        assert_eq!(
            interpret_response(err),
            OrderOutcome::Rejected("User or API Wallet does not exist.".into())
        );
        let order_err = r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"error":"Order must have minimum value of $10."}]}}}"#;
        assert!(matches!(interpret_response(order_err), OrderOutcome::Rejected(m) if m.contains("minimum")));
        assert!(matches!(interpret_response("<html>"), OrderOutcome::Rejected(_)));
    }

    #[test]
    fn cancel_success_decodes() {
        let body = r#"{"status":"ok","response":{"type":"cancel","data":{"statuses":["success"]}}}"#;
        let resp: ExchangeResponse = serde_json::from_str(body).unwrap();
        let ExchangeResponse::Ok(ok) = resp else { panic!("expected ok") };
        assert_eq!(ok.data.unwrap().statuses, vec![StatusWire::Success]);
    }

    #[test]
    fn info_requests_serialize() {
        let req = InfoRequest::CandleSnapshot {
            req: CandleRequest { coin: "BTC", interval: "1m", start_time: 1, end_time: 2 },
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"type": "candleSnapshot", "req": {"coin": "BTC", "interval": "1m", "startTime": 1, "endTime": 2}})
        );
        assert_eq!(serde_json::to_value(&InfoRequest::Meta).unwrap(), serde_json::json!({"type": "meta"}));
    }

    #[test]
    fn clearinghouse_state_decodes() {
        let body = r#"{"assetPositions":[{"position":{"coin":"BTC","szi":"-0.01","entryPx":"67000.0","unrealizedPnl":"1.2","leverage":{"type":"cross","value":5}},"type":"oneWay"}],"marginSummary":{"accountValue":"1000.5","totalNtlPos":"670"},"withdrawable":"900"}"#;
        let state: ClearinghouseState = serde_json::from_str(body).unwrap();
        assert_eq!(state.asset_positions[0].position.szi, "-0.01");
        assert_eq!(state.margin_summary.unwrap().account_value, "1000.5");
    }
}
