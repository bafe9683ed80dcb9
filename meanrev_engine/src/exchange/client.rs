/// client.rs — Hyperliquid REST client
///
/// Two endpoints:
///   POST /info      — unsigned queries (meta, clearinghouseState, candleSnapshot)
///   POST /exchange  — signed actions (order, cancel)
///
/// ORDER FLOW:
///   1. Resolve asset index + szDecimals from `meta` (cached after first call)
///   2. Round price / size to the asset's tick rules
///   3. Sign msgpack(action) with the current ms timestamp as nonce
///   4. POST {action, nonce, signature, vaultAddress} and decode the status
use std::time::Duration;

use ahash::AHashMap;
use k256::ecdsa::SigningKey;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::signing::{address_from_key, parse_private_key, sign_l1_action};
use super::wire::{
    interpret_response, slippage_price, Action, Candle, CandleRequest, CandleWire,
    ClearinghouseState, ExchangeRequest, ExchangeResponse, InfoRequest, Meta, OrderOutcome, OrderWire, Tif,
};
use crate::config::AppConfig;
use crate::error::ExchangeError;
use crate::models::{OrderSide, PositionSide};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetInfo {
    pub index: u32,
    pub sz_decimals: u32,
}

/// Net exchange position for one coin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangePosition {
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderRequestKind {
    /// IOC limit at price ± slippage
    Market { slippage: f64 },
    /// GTC at the given price
    Limit,
}

pub struct HyperliquidClient {
    http:            Client,
    base_url:        String,
    is_mainnet:      bool,
    signing_key:     Option<SigningKey>,
    account_address: Option<String>,
    vault_address:   Option<String>,
    assets:          Mutex<Option<AHashMap<String, AssetInfo>>>,
}

impl HyperliquidClient {
    pub fn new(base_url: &str, is_mainnet: bool) -> Result<Self, ExchangeError> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            is_mainnet,
            signing_key: None,
            account_address: None,
            vault_address: None,
            assets: Mutex::new(None),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ExchangeError> {
        let mut client = Self::new(&cfg.rest_url, !cfg.use_testnet)?;
        if let Some(key) = &cfg.private_key {
            client = client.with_private_key(key)?;
        }
        if let Some(addr) = &cfg.account_address {
            client.account_address = Some(addr.to_lowercase());
        }
        client.vault_address = cfg.vault_address.as_ref().map(|v| v.to_lowercase());
        Ok(client)
    }

    /// Attach a signing key; the account address defaults to the key's.
    pub fn with_private_key(mut self, key: &str) -> Result<Self, ExchangeError> {
        let sk = parse_private_key(key)?;
        let addr = address_from_key(&sk);
        info!("Signing as {}", addr);
        self.account_address.get_or_insert(addr);
        self.signing_key = Some(sk);
        Ok(self)
    }

    pub fn account_address(&self) -> Option<&str> {
        self.vault_address.as_deref().or(self.account_address.as_deref())
    }

    // ── Info ──────────────────────────────────────────────────────────────

    async fn info<T: DeserializeOwned>(&self, req: &InfoRequest<'_>) -> Result<T, ExchangeError> {
        let url = format!("{}/info", self.base_url);
        let resp = self.http.post(&url).json(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Status { status: status.as_u16(), body });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Asset index and size decimals for a coin.
    pub async fn asset(&self, coin: &str) -> Result<AssetInfo, ExchangeError> {
        let mut guard = self.assets.lock().await;
        if guard.is_none() {
            let meta: Meta = self.info(&InfoRequest::Meta).await?;
            let map: AHashMap<String, AssetInfo> = meta
                .universe
                .into_iter()
                .enumerate()
                .map(|(idx, a)| (a.name, AssetInfo { index: idx as u32, sz_decimals: a.sz_decimals }))
                .collect();
            debug!("Loaded {} perp assets", map.len());
            *guard = Some(map);
        }
        // names are case-sensitive (kPEPE); fall back to a case-insensitive match
        guard
            .as_ref()
            .and_then(|m| {
                m.get(coin).copied().or_else(|| {
                    m.iter().find(|(name, _)| name.eq_ignore_ascii_case(coin)).map(|(_, a)| *a)
                })
            })
            .ok_or_else(|| ExchangeError::UnknownAsset(coin.to_owned()))
    }

    pub async fn user_state(&self, user: &str) -> Result<ClearinghouseState, ExchangeError> {
        self.info(&InfoRequest::ClearinghouseState { user }).await
    }

    /// Current position for `coin` on the configured account.
    pub async fn position(&self, coin: &str) -> Result<ExchangePosition, ExchangeError> {
        let user = self.account_address().ok_or(ExchangeError::MissingKey)?;
        let state = self.user_state(user).await?;
        let flat = ExchangePosition { side: PositionSide::Flat, size: 0.0, entry_price: None };
        let Some(p) = state
            .asset_positions
            .into_iter()
            .map(|a| a.position)
            .find(|p| p.coin.eq_ignore_ascii_case(coin))
        else {
            return Ok(flat);
        };
        let szi: f64 = p.szi.parse().unwrap_or(0.0);
        let side = if szi > 0.0 {
            PositionSide::Long
        } else if szi < 0.0 {
            PositionSide::Short
        } else {
            return Ok(flat);
        };
        Ok(ExchangePosition {
            side,
            size: szi.abs(),
            entry_price: p.entry_px.and_then(|e| e.parse().ok()),
        })
    }

    /// Candles for `[start_ms, end_ms]`, oldest first.  Unparseable rows are dropped.
    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let req = InfoRequest::CandleSnapshot {
            req: CandleRequest { coin, interval, start_time: start_ms, end_time: end_ms },
        };
        let raw: Vec<CandleWire> = self.info(&req).await?;
        let total = raw.len();
        let mut candles: Vec<Candle> = raw.iter().filter_map(CandleWire::parse).collect();
        if candles.len() < total {
            warn!("Dropped {} malformed candles", total - candles.len());
        }
        candles.sort_by_key(|c| c.open_ms);
        Ok(candles)
    }

    // ── Exchange ──────────────────────────────────────────────────────────

    async fn post_action(&self, action: &Action) -> Result<String, ExchangeError> {
        let key = self.signing_key.as_ref().ok_or(ExchangeError::MissingKey)?;
        let nonce = chrono::Utc::now().timestamp_millis() as u64;
        let vault = self.vault_address.as_deref();
        let signature = sign_l1_action(key, action, vault, nonce, self.is_mainnet)?;
        let payload = ExchangeRequest { action, nonce, signature, vault_address: vault };

        let url = format!("{}/exchange", self.base_url);
        let resp = self.http.post(&url).json(&payload).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Status { status: status.as_u16(), body });
        }
        Ok(body)
    }

    /// Submit a single order.  `price` is the reference (last trade) price.
    pub async fn place_order(
        &self,
        coin: &str,
        side: OrderSide,
        size: f64,
        price: f64,
        kind: OrderRequestKind,
        reduce_only: bool,
    ) -> Result<OrderOutcome, ExchangeError> {
        let asset = self.asset(coin).await?;
        let (px, tif) = match kind {
            OrderRequestKind::Market { slippage } => {
                (slippage_price(price, side, slippage, asset.sz_decimals), Tif::Ioc)
            }
            OrderRequestKind::Limit => (price, Tif::Gtc),
        };
        let wire = OrderWire::new(asset.index, side, px, size, asset.sz_decimals, reduce_only, tif);
        info!("Placing {} {} {} @ {} ({:?}, reduce_only={})", side, wire.s, coin, wire.p, tif, reduce_only);

        let body = self.post_action(&Action::single_order(wire)).await?;
        let outcome = interpret_response(&body);
        debug!("Order response: {}", body);
        Ok(outcome)
    }

    pub async fn cancel(&self, coin: &str, oid: u64) -> Result<(), ExchangeError> {
        let asset = self.asset(coin).await?;
        let body = self.post_action(&Action::cancel(asset.index, oid)).await?;
        match serde_json::from_str::<ExchangeResponse>(&body)? {
            ExchangeResponse::Ok(_) => {
                info!("Cancelled {} order {}", coin, oid);
                Ok(())
            }
            ExchangeResponse::Err(msg) => {
                Err(ExchangeError::Status { status: 200, body: msg })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;

    #[test]
    fn key_sets_default_account() {
        let client = HyperliquidClient::new("https://api.hyperliquid.xyz/", true)
            .unwrap()
            .with_private_key("0x0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap();
        assert_eq!(client.base_url, "https://api.hyperliquid.xyz");
        assert_eq!(client.account_address(), Some("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"));
    }

    #[test]
    fn vault_overrides_account_for_queries() {
        let mut cfg = AppConfig::paper(StrategyConfig::default());
        cfg.account_address = Some("0xAAAA000000000000000000000000000000000001".into());
        cfg.vault_address = Some("0xBBBB000000000000000000000000000000000002".into());
        let client = HyperliquidClient::from_config(&cfg).unwrap();
        assert_eq!(client.account_address(), Some("0xbbbb000000000000000000000000000000000002"));
    }

    #[tokio::test]
    async fn asset_lookup_keeps_coin_case() {
        let url = crate::exchange::stub::serve(crate::exchange::stub::BTC_META, "{}").await;
        let client = HyperliquidClient::new(&url, true).unwrap();
        assert_eq!(client.asset("kPEPE").await.unwrap(), AssetInfo { index: 1, sz_decimals: 0 });
        assert_eq!(client.asset("btc").await.unwrap(), AssetInfo { index: 0, sz_decimals: 5 });
        assert!(matches!(client.asset("DOGE").await, Err(ExchangeError::UnknownAsset(c)) if c == "DOGE"));
    }

    #[tokio::test]
    async fn orders_need_a_key() {
        let client = HyperliquidClient::new("http://127.0.0.1:9", true).unwrap();
        let err = client.post_action(&Action::cancel(0, 1)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::MissingKey));
    }
}
