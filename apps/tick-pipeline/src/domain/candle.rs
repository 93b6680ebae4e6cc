//! OHLCV Candle
//!
//! Fixed-width, epoch-aligned aggregation of ticks. Candles are derived on
//! demand and never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::tick::{Tick, TickError};

/// One OHLCV bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    /// Symbol the bucket was built from.
    pub symbol: String,
    /// Bucket start (inclusive).
    pub timestamp: DateTime<Utc>,
    /// First trade price in the bucket.
    pub open: f64,
    /// Highest trade price in the bucket.
    pub high: f64,
    /// Lowest trade price in the bucket.
    pub low: f64,
    /// Last trade price in the bucket.
    pub close: f64,
    /// Sum of trade sizes in the bucket.
    pub volume: f64,
}

impl Candle {
    /// Start a candle from its first trade.
    #[must_use]
    pub fn open_at(symbol: &str, timestamp: DateTime<Utc>, price: f64, size: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
        }
    }

    /// Fold another trade into the candle.
    pub fn update(&mut self, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
    }
}

/// One row of externally supplied OHLCV history.
///
/// Backfilled rows become ticks priced at `close` with size `volume`; the
/// other fields are validated by the reader but otherwise unused.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvRow {
    /// Bar time.
    pub time: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
}

impl OhlcvRow {
    /// Convert the bar to the tick it is stored as.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if `close` or `volume` fail tick validation.
    pub fn to_tick(&self, symbol: &str) -> Result<Tick, TickError> {
        Tick::new(symbol, self.time, self.close, self.volume)
    }
}
