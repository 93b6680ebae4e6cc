//! Trade Message Codec
//!
//! Decodes exchange trade messages into [`Tick`]s.
//!
//! Two event types are understood, distinguished by the `e` field:
//!
//! - `aggTrade`: aggregated trade, time taken from `T` (trade time)
//! - `trade`: raw trade, time taken from `E` (event time)
//!
//! Both carry `s` (symbol), `p` (price) and `q` (quantity), with price and
//! quantity sent as decimal strings. Combined-stream envelopes
//! (`{"stream": ..., "data": {...}}`) are unwrapped first.
//!
//! ```json
//! {"e":"aggTrade","E":1700000000100,"s":"BTCUSDT","a":1,"p":"42000.10","q":"0.003","T":1700000000095,"m":true}
//! ```

use serde::{Deserialize, Deserializer, de};
use serde_json::Value;

use crate::domain::tick::{Tick, TickError};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload was not valid JSON or did not match the trade schema.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload was JSON but not an object.
    #[error("expected JSON object")]
    NotAnObject,

    /// Values parsed but do not form a valid tick.
    #[error("invalid tick: {0}")]
    InvalidTick(#[from] TickError),
}

/// Trade events, discriminated by `e`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "e")]
pub enum TradeMessage {
    /// Aggregated trade stream.
    #[serde(rename = "aggTrade")]
    AggTrade(AggTradeMessage),
    /// Raw trade stream.
    #[serde(rename = "trade")]
    Trade(RawTradeMessage),
}

/// Aggregated trade. Time is the trade time `T`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggTradeMessage {
    /// Exchange symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Price
    #[serde(rename = "p", deserialize_with = "decimal")]
    pub price: f64,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "decimal")]
    pub quantity: f64,

    /// Trade time (ms since epoch)
    #[serde(rename = "T")]
    pub trade_time: i64,
}

/// Raw trade. Time is the event time `E`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTradeMessage {
    /// Exchange symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Price
    #[serde(rename = "p", deserialize_with = "decimal")]
    pub price: f64,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "decimal")]
    pub quantity: f64,

    /// Event time (ms since epoch)
    #[serde(rename = "E")]
    pub event_time: i64,
}

impl TradeMessage {
    /// Validate into a [`Tick`].
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if the price or size is out of range.
    pub fn into_tick(self) -> Result<Tick, TickError> {
        match self {
            Self::AggTrade(m) => Tick::from_millis(&m.symbol, m.trade_time, m.price, m.quantity),
            Self::Trade(m) => Tick::from_millis(&m.symbol, m.event_time, m.price, m.quantity),
        }
    }
}

/// Prices and quantities arrive as decimal strings; bare numbers are accepted too.
fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid decimal {text:?}"))),
        Raw::Number(n) => Ok(n),
    }
}

/// JSON codec for exchange trade streams.
#[derive(Debug, Default, Clone)]
pub struct TradeCodec;

impl TradeCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for messages that are not trade events (including
    /// subscription acks and unknown `e` values).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for malformed JSON, missing fields, unparsable
    /// numbers, or values that fail tick validation.
    pub fn decode(&self, text: &str) -> Result<Option<Tick>, CodecError> {
        let value = unwrap_envelope(serde_json::from_str(text.trim())?);
        if !value.is_object() {
            return Err(CodecError::NotAnObject);
        }

        match value.get("e").and_then(Value::as_str) {
            Some("aggTrade" | "trade") => {}
            _ => return Ok(None),
        }

        let message: TradeMessage = serde_json::from_value(value)?;
        Ok(Some(message.into_tick()?))
    }
}

/// Combined streams wrap each event as `{"stream": ..., "data": {...}}`.
fn unwrap_envelope(mut value: Value) -> Value {
    if value.get("stream").is_some()
        && let Some(data) = value.get_mut("data")
    {
        return data.take();
    }
    value
}
