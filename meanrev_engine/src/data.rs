/// data.rs — Price history for warm-up and backtests
///
/// Two sources:
///   * Hyperliquid `candleSnapshot` (REST) — close prices of the most recent
///     N candles, used to fill the rolling window before the live feed starts
///   * CSV / Parquet files — any table with a `price` or `close` column and an
///     optional `ts_ms` / `timestamp` / `open_time` column (ms)
use std::path::Path;

use anyhow::{bail, Context, Result};
use polars::prelude::*;
use tracing::info;

use crate::error::ExchangeError;
use crate::exchange::{Candle, HyperliquidClient};
use crate::models::PriceTick;

const PRICE_COLUMNS: [&str; 2] = ["price", "close"];
const TIME_COLUMNS: [&str; 3] = ["ts_ms", "timestamp", "open_time"];
const SIZE_COLUMNS: [&str; 3] = ["size", "sz", "volume"];

/// Candle interval string ("1m", "15m", "1h", "1d", …) in milliseconds.
pub fn interval_ms(interval: &str) -> Option<i64> {
    let interval = interval.trim();
    let (unit_at, _) = interval.char_indices().last()?;
    let (num, unit) = interval.split_at(unit_at);
    let n: i64 = num.parse().ok()?;
    let unit_ms = match unit {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        _ => return None,
    };
    (n > 0).then_some(n * unit_ms)
}

/// One tick per candle at its close price.
pub fn candles_to_ticks(candles: &[Candle]) -> Vec<PriceTick> {
    candles
        .iter()
        .filter(|c| c.close.is_finite() && c.close > 0.0)
        .map(|c| PriceTick::new(c.open_ms, c.close, c.close * c.volume))
        .collect()
}

/// Fetch the last `count` candles for `coin` and turn them into ticks.
pub async fn fetch_warmup_ticks(
    client: &HyperliquidClient,
    coin: &str,
    interval: &str,
    count: u32,
) -> Result<Vec<PriceTick>, ExchangeError> {
    let step = interval_ms(interval)
        .ok_or_else(|| ExchangeError::InvalidRequest(format!("unsupported candle interval {interval}")))?;
    let end = chrono::Utc::now().timestamp_millis();
    let start = end - step * i64::from(count);
    let candles = client.candle_snapshot(coin, interval, start, end).await?;
    info!("Fetched {} {} candles for {} warm-up", candles.len(), interval, coin);
    Ok(candles_to_ticks(&candles))
}

fn find_column<'a>(df: &DataFrame, names: &[&'a str]) -> Option<&'a str> {
    names.iter().copied().find(|n| df.column(n).is_ok())
}

/// Load a price history from a `.csv` or `.parquet` file, oldest first.
pub fn load_history(path: &Path) -> Result<Vec<PriceTick>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let df = match ext.as_str() {
        "parquet" => LazyFrame::scan_parquet(path, Default::default())?.collect()?,
        "csv" => LazyCsvReader::new(path).with_has_header(true).finish()?.collect()?,
        other => bail!("unsupported history format {:?} ({})", other, path.display()),
    };
    let ticks = dataframe_to_ticks(&df).with_context(|| format!("reading {}", path.display()))?;
    info!("Loaded {} prices from {}", ticks.len(), path.display());
    Ok(ticks)
}

pub fn dataframe_to_ticks(df: &DataFrame) -> Result<Vec<PriceTick>> {
    let Some(price_col) = find_column(df, &PRICE_COLUMNS) else {
        bail!("no price column (expected one of {:?})", PRICE_COLUMNS);
    };
    let prices = df.column(price_col)?.cast(&DataType::Float64)?;
    let prices = prices.as_materialized_series().f64()?;

    let times = match find_column(df, &TIME_COLUMNS) {
        Some(col) => Some(df.column(col)?.cast(&DataType::Int64)?),
        None => None,
    };
    let sizes = match find_column(df, &SIZE_COLUMNS) {
        Some(col) => Some(df.column(col)?.cast(&DataType::Float64)?),
        None => None,
    };
    let times = times.as_ref().map(|c| c.as_materialized_series().i64()).transpose()?;
    let sizes = sizes.as_ref().map(|c| c.as_materialized_series().f64()).transpose()?;

    let mut ticks = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let Some(price) = prices.get(i) else { continue };
        if !price.is_finite() || price <= 0.0 {
            continue;
        }
        // synthetic one-minute spacing when the file has no time column
        let ts_ms = times.and_then(|t| t.get(i)).unwrap_or(i as i64 * 60_000);
        let notional = sizes.and_then(|s| s.get(i)).map_or(price, |sz| price * sz);
        ticks.push(PriceTick::new(ts_ms, price, notional));
    }
    ticks.sort_by_key(|t| t.ts_ms);
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn intervals() {
        assert_eq!(interval_ms("1m"), Some(60_000));
        assert_eq!(interval_ms("15m"), Some(900_000));
        assert_eq!(interval_ms("4h"), Some(14_400_000));
        assert_eq!(interval_ms("1d"), Some(86_400_000));
        assert_eq!(interval_ms("x"), None);
        assert_eq!(interval_ms(""), None);
        assert_eq!(interval_ms("0m"), None);
    }

    #[test]
    fn candle_closes_become_ticks() {
        let candles = vec![
            Candle { open_ms: 0, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 10.0 },
            Candle { open_ms: 60_000, open: 1.5, high: 1.6, low: 1.4, close: 0.0, volume: 1.0 },
        ];
        let ticks = candles_to_ticks(&candles);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].price, 1.5);
        assert_eq!(ticks[0].notional, 15.0);
    }

    #[test]
    fn csv_with_close_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btc.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "open_time,open,high,low,close,volume").unwrap();
        writeln!(f, "120000,101,102,100,101.5,2").unwrap();
        writeln!(f, "60000,100,101,99,100.5,1").unwrap();
        drop(f);

        let ticks = load_history(&path).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].ts_ms, 60_000);
        assert_eq!(ticks[0].price, 100.5);
        assert_eq!(ticks[1].notional, 203.0);
    }

    #[test]
    fn price_only_frame() {
        let df = df!("price" => &[100.0, 101.0, -1.0]).unwrap();
        let ticks = dataframe_to_ticks(&df).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[1].ts_ms, 60_000);
        assert_eq!(ticks[1].notional, 101.0);
    }

    #[test]
    fn missing_price_column_is_an_error() {
        let df = df!("foo" => &[1.0]).unwrap();
        assert!(dataframe_to_ticks(&df).is_err());
        assert!(load_history(Path::new("prices.txt")).is_err());
    }
}
