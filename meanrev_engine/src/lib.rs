pub mod account;
pub mod backtest;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod risk;
pub mod schedule;
pub mod store;
pub mod strategy;
pub mod stream;

pub use models::*;
