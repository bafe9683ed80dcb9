/// config.rs — Centralised configuration loaded from .env
///
/// All parameters consumed by the engine are defined here.
/// Loading happens once at startup; every module borrows the part it needs.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const MAINNET_REST_URL: &str = "https://api.hyperliquid.xyz";
pub const TESTNET_REST_URL: &str = "https://api.hyperliquid-testnet.xyz";
pub const MAINNET_WS_URL:   &str = "wss://api.hyperliquid.xyz/ws";
pub const TESTNET_WS_URL:   &str = "wss://api.hyperliquid-testnet.xyz/ws";

/// Hyperliquid rejects orders below $10 notional.
pub const DEFAULT_MIN_ORDER_USD: f64 = 10.0;
/// Taker fee on the base tier (0.035%).
pub const DEFAULT_FEE_RATE: f64 = 0.00035;
/// Same default the official SDK uses for market orders.
pub const DEFAULT_MARKET_SLIPPAGE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    /// IOC limit at last price ± slippage
    Market,
    /// GTC limit at last price
    Limit,
}

/// Parameters of the mean-reversion strategy and its position sizing.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub symbol: String,
    /// Rolling window length (number of ticks)
    pub lookback_period: usize,
    /// Enter when |Z| >= entry_z_score
    pub entry_z_score: f64,
    /// Exit when |Z| <= exit_z_score
    pub exit_z_score: f64,
    /// Minimum gap between two entry signals
    pub signal_cooldown: Duration,
    /// Notional at confidence = 1 (USD)
    pub base_position_usd: f64,
    /// Hard cap on a single order's notional (USD)
    pub max_position_usd: f64,
    /// Orders below this notional are suppressed (USD)
    pub min_order_usd: f64,
    /// Rolling window for the order-flow imbalance
    pub flow_window: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC".into(),
            lookback_period: 12,
            entry_z_score: 0.75,
            exit_z_score: 0.25,
            signal_cooldown: Duration::from_secs(60),
            base_position_usd: 100.0,
            max_position_usd: 500.0,
            min_order_usd: DEFAULT_MIN_ORDER_USD,
            flow_window: 200,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(invalid("SYMBOL", "must not be empty"));
        }
        if self.lookback_period < 2 {
            return Err(invalid("LOOKBACK_PERIOD", "must be at least 2"));
        }
        if !(self.exit_z_score >= 0.0) {
            return Err(invalid("EXIT_Z_SCORE", "must be non-negative"));
        }
        if !(self.entry_z_score > self.exit_z_score) {
            return Err(ConfigError::ThresholdOrder {
                entry: self.entry_z_score,
                exit: self.exit_z_score,
            });
        }
        if !(self.base_position_usd > 0.0) {
            return Err(invalid("BASE_POSITION_USD", "must be positive"));
        }
        if !(self.max_position_usd >= self.min_order_usd) {
            return Err(invalid("MAX_POSITION_USD", "must be at least MIN_ORDER_USD"));
        }
        if !(self.min_order_usd >= 0.0) {
            return Err(invalid("MIN_ORDER_USD", "must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Hyperliquid endpoints & credentials ──────────────────────────
    pub use_testnet: bool,
    pub rest_url:    String,
    pub ws_url:      String,
    /// Hex secp256k1 key (API wallet or main wallet)
    pub private_key:     Option<String>,
    /// Account whose positions are queried (defaults to the key's address)
    pub account_address: Option<String>,
    pub vault_address:   Option<String>,

    // ── Strategy ─────────────────────────────────────────────────────
    pub strategy: StrategyConfig,

    // ── Execution ────────────────────────────────────────────────────
    /// Simulate fills locally instead of sending orders
    pub dry_run:         bool,
    pub order_kind:      OrderKind,
    pub market_slippage: f64,

    // ── Paper ledger ─────────────────────────────────────────────────
    pub account_name:    String,
    pub initial_balance: f64,
    pub leverage:        f64,
    pub fee_rate:        f64,

    // ── Reporting / persistence ─────────────────────────────────────
    pub snapshot_interval:  Duration,
    pub database_url:       Option<String>,
    pub account_state_path: Option<PathBuf>,

    // ── Warm-up history ──────────────────────────────────────────────
    pub candle_interval: String,
    pub warmup_candles:  u32,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // ignore missing .env

        let use_testnet = parse_bool("HL_USE_TESTNET", false)?;
        let rest_url = env::var("HL_REST_URL").unwrap_or_else(|_| {
            if use_testnet { TESTNET_REST_URL.into() } else { MAINNET_REST_URL.into() }
        });
        let ws_url = env::var("HL_WS_URL").unwrap_or_else(|_| {
            if use_testnet { TESTNET_WS_URL.into() } else { MAINNET_WS_URL.into() }
        });

        let order_kind = match env::var("ORDER_TYPE")
            .unwrap_or_else(|_| "market".into())
            .to_lowercase()
            .as_str()
        {
            "market" => OrderKind::Market,
            "limit" => OrderKind::Limit,
            other => return Err(invalid("ORDER_TYPE", format!("expected market|limit, got {other}"))),
        };

        let strategy = StrategyConfig {
            symbol: env::var("SYMBOL").unwrap_or_else(|_| "BTC".into()).trim().to_owned(),
            lookback_period:   parse_env("LOOKBACK_PERIOD",   12usize)?,
            entry_z_score:     parse_env("ENTRY_Z_SCORE",     0.75)?,
            exit_z_score:      parse_env("EXIT_Z_SCORE",      0.25)?,
            signal_cooldown:   Duration::from_secs(parse_env("SIGNAL_COOLDOWN_SECS", 60u64)?),
            base_position_usd: parse_env("BASE_POSITION_USD", 100.0)?,
            max_position_usd:  parse_env("MAX_POSITION_USD",  500.0)?,
            min_order_usd:     parse_env("MIN_ORDER_USD",     DEFAULT_MIN_ORDER_USD)?,
            flow_window:       parse_env("FLOW_WINDOW",       200usize)?,
        };

        let cfg = Self {
            use_testnet,
            rest_url,
            ws_url,
            private_key:     non_empty("HL_PRIVATE_KEY"),
            account_address: non_empty("HL_ACCOUNT_ADDRESS"),
            vault_address:   non_empty("HL_VAULT_ADDRESS"),

            strategy,

            dry_run:         parse_bool("DRY_RUN", true)?,
            order_kind,
            market_slippage: parse_env("MARKET_SLIPPAGE", DEFAULT_MARKET_SLIPPAGE)?,

            account_name:    env::var("ACCOUNT_NAME").unwrap_or_else(|_| "paper".into()),
            initial_balance: parse_env("INITIAL_BALANCE", 10_000.0)?,
            leverage:        parse_env("LEVERAGE",        1.0)?,
            fee_rate:        parse_env("FEE_RATE",        DEFAULT_FEE_RATE)?,

            snapshot_interval:  Duration::from_secs(parse_env("SNAPSHOT_INTERVAL_SECS", 60u64)?),
            database_url:       non_empty("DATABASE_URL"),
            account_state_path: non_empty("ACCOUNT_STATE_PATH").map(PathBuf::from),

            candle_interval: env::var("CANDLE_INTERVAL").unwrap_or_else(|_| "1m".into()),
            warmup_candles:  parse_env("WARMUP_CANDLES", 0u32)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        if !self.dry_run && self.private_key.is_none() {
            return Err(ConfigError::Missing("HL_PRIVATE_KEY"));
        }
        if !(self.initial_balance > 0.0) {
            return Err(invalid("INITIAL_BALANCE", "must be positive"));
        }
        if !(self.leverage >= 1.0) {
            return Err(invalid("LEVERAGE", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(invalid("FEE_RATE", "must be in [0, 1)"));
        }
        if !(0.0..1.0).contains(&self.market_slippage) {
            return Err(invalid("MARKET_SLIPPAGE", "must be in [0, 1)"));
        }
        if self.snapshot_interval.is_zero() {
            return Err(invalid("SNAPSHOT_INTERVAL_SECS", "must be positive"));
        }
        Ok(())
    }

    /// Dry-run configuration with defaults, used by the backtest and tests.
    pub fn paper(strategy: StrategyConfig) -> Self {
        Self {
            use_testnet: false,
            rest_url: MAINNET_REST_URL.into(),
            ws_url: MAINNET_WS_URL.into(),
            private_key: None,
            account_address: None,
            vault_address: None,
            strategy,
            dry_run: true,
            order_kind: OrderKind::Market,
            market_slippage: DEFAULT_MARKET_SLIPPAGE,
            account_name: "paper".into(),
            initial_balance: 10_000.0,
            leverage: 1.0,
            fee_rate: 0.0,
            snapshot_interval: Duration::from_secs(60),
            database_url: None,
            account_state_path: None,
            candle_interval: "1m".into(),
            warmup_candles: 0,
        }
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue { key, reason: reason.into() }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(key, format!("expected a boolean, got {other}"))),
        },
        Err(_) => Ok(default),
    }
}
