pub mod client;
pub mod signing;
pub mod wire;

#[cfg(test)]
pub(crate) mod stub;

pub use client::{AssetInfo, ExchangePosition, HyperliquidClient, OrderRequestKind};
pub use wire::{Candle, OrderOutcome};
