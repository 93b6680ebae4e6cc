//! Trade Tick
//!
//! A single executed trade as reported by the exchange. Ticks are validated
//! once at construction and never mutated afterwards.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Errors raised when constructing a tick from untrusted input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickError {
    /// Symbol was empty after trimming.
    #[error("symbol cannot be empty")]
    EmptySymbol,

    /// Price was non-finite or not strictly positive.
    #[error("invalid price: {0}")]
    InvalidPrice(f64),

    /// Size was non-finite or negative.
    #[error("invalid size: {0}")]
    InvalidSize(f64),

    /// Millisecond timestamp outside the representable range.
    #[error("timestamp out of range: {0}ms")]
    InvalidTimestamp(i64),
}

/// An executed trade.
///
/// The symbol is always stored lowercase so `BTCUSDT` and `btcusdt` address
/// the same series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    symbol: String,
    timestamp: DateTime<Utc>,
    price: f64,
    size: f64,
}

impl Tick {
    /// Create a validated tick.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if the symbol is blank, the price is not a
    /// positive finite number, or the size is negative or non-finite.
    pub fn new(
        symbol: impl AsRef<str>,
        timestamp: DateTime<Utc>,
        price: f64,
        size: f64,
    ) -> Result<Self, TickError> {
        let symbol = normalize_symbol(symbol.as_ref());
        if symbol.is_empty() {
            return Err(TickError::EmptySymbol);
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(TickError::InvalidPrice(price));
        }
        if !size.is_finite() || size < 0.0 {
            return Err(TickError::InvalidSize(size));
        }

        Ok(Self {
            symbol,
            timestamp,
            price,
            size,
        })
    }

    /// Create a tick from a millisecond epoch timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`Tick::new`], plus [`TickError::InvalidTimestamp`] when the
    /// millisecond value cannot be represented.
    pub fn from_millis(
        symbol: impl AsRef<str>,
        timestamp_ms: i64,
        price: f64,
        size: f64,
    ) -> Result<Self, TickError> {
        let timestamp = Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .ok_or(TickError::InvalidTimestamp(timestamp_ms))?;
        Self::new(symbol, timestamp, price, size)
    }

    /// Lowercase symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Exchange-reported trade time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Trade time as milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Trade price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Trade quantity.
    #[must_use]
    pub const fn size(&self) -> f64 {
        self.size
    }
}

/// Normalize a symbol to the form used for storage and lookups.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_lowercase()
}

/// Extract the price series from a tick slice.
#[must_use]
pub fn prices(ticks: &[Tick]) -> Vec<f64> {
    ticks.iter().map(Tick::price).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_lowercased() {
        let tick = Tick::from_millis("BTCUSDT", 1_700_000_000_000, 42_000.5, 0.25).unwrap();
        assert_eq!(tick.symbol(), "btcusdt");
    }

    #[test]
    fn rejects_non_positive_price() {
        let now = Utc::now();
        assert_eq!(
            Tick::new("btcusdt", now, 0.0, 1.0),
            Err(TickError::InvalidPrice(0.0))
        );
        assert!(matches!(
            Tick::new("btcusdt", now, f64::NAN, 1.0),
            Err(TickError::InvalidPrice(_))
        ));
    }

    #[test]
    fn rejects_negative_size() {
        assert_eq!(
            Tick::new("btcusdt", Utc::now(), 1.0, -0.1),
            Err(TickError::InvalidSize(-0.1))
        );
    }

    #[test]
    fn zero_size_is_allowed() {
        assert!(Tick::new("btcusdt", Utc::now(), 1.0, 0.0).is_ok());
    }

    #[test]
    fn rejects_blank_symbol() {
        assert_eq!(
            Tick::new("   ", Utc::now(), 1.0, 1.0),
            Err(TickError::EmptySymbol)
        );
    }

    #[test]
    fn millisecond_round_trip() {
        let tick = Tick::from_millis("ethusdt", 1_700_000_000_123, 2000.0, 1.0).unwrap();
        assert_eq!(tick.timestamp_ms(), 1_700_000_000_123);
    }

    #[test]
    fn serializes_public_shape() {
        let tick = Tick::from_millis("ethusdt", 0, 2000.0, 1.5).unwrap();
        let value = serde_json::to_value(&tick).unwrap();
        assert_eq!(value["symbol"], "ethusdt");
        assert_eq!(value["price"], 2000.0);
        assert_eq!(value["size"], 1.5);
        assert!(value["timestamp"].as_str().unwrap().starts_with("1970-01-01T00:00:00"));
    }
}
