//! Error types at the module seams.  Binaries wrap these in `anyhow`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config key {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("entry z-score ({entry}) must be greater than exit z-score ({exit})")]
    ThresholdOrder { entry: f64, exit: f64 },

    #[error("{0} is required in live mode")]
    Missing(&'static str),
}

#[derive(Error, Debug, PartialEq)]
pub enum StrategyError {
    #[error("rejected price {0}: must be finite and positive")]
    InvalidPrice(f64),
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode exchange response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to encode action: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown asset {0}")]
    UnknownAsset(String),

    #[error("private key is not configured")]
    MissingKey,
}

#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    #[error("insufficient balance: required {required:.2}, available {available:.2}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("no mark price for {0}")]
    NoMarkPrice(String),

    #[error("order {0} not found")]
    UnknownOrder(Uuid),

    #[error("order {0} is not pending")]
    NotPending(Uuid),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("no message for {0:?}")]
    Stale(std::time::Duration),

    #[error("server closed the connection")]
    Closed,

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("tick receiver dropped")]
    ReceiverDropped,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("snapshot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding: {0}")]
    Json(#[from] serde_json::Error),
}
