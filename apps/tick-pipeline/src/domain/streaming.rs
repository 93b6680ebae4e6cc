//! Events pushed to live subscribers.

use serde::Serialize;

use super::tick::Tick;

/// Message delivered over a subscriber channel.
///
/// Serialized as `{"type":"tick","data":{...}}` or `{"type":"ping"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A newly ingested trade.
    Tick(Tick),
    /// Keepalive for otherwise idle subscribers.
    Ping,
}

impl StreamEvent {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tick(_) => "tick",
            Self::Ping => "ping",
        }
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
