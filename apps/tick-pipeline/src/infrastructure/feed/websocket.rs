//! WebSocket Transport
//!
//! [`FeedConnector`] backed by `tokio-tungstenite`, speaking to the Binance
//! USD-M futures public stream (`wss://fstream.binance.com/ws/{symbol}@aggTrade`).
//! The public market-data streams need no authentication.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{FeedConnector, FeedError, FeedFrame, FeedSession};
use crate::infrastructure::config::FeedSettings;

/// Default public stream endpoint.
pub const DEFAULT_BASE_URL: &str = "wss://fstream.binance.com/ws";

/// Default per-symbol channel.
pub const DEFAULT_STREAM: &str = "aggTrade";

/// Connects to `{base_url}/{symbol}@{stream}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceConnector {
    base_url: String,
    stream: String,
}

impl Default for BinanceConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_STREAM)
    }
}

impl BinanceConnector {
    /// Create a connector for a custom endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            stream: stream.into(),
        }
    }

    /// Build from feed settings.
    #[must_use]
    pub fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self::new(settings.base_url.clone(), settings.stream.clone())
    }

    /// Stream URL for a symbol.
    #[must_use]
    pub fn url_for(&self, symbol: &str) -> String {
        format!("{}/{}@{}", self.base_url, symbol.to_lowercase(), self.stream)
    }
}

#[async_trait]
impl FeedConnector for BinanceConnector {
    async fn connect(&self, symbol: &str) -> Result<Box<dyn FeedSession>, FeedError> {
        let url = self.url_for(symbol);
        tracing::debug!(url = %url, "Opening WebSocket");
        let (stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        Ok(Box::new(WsSession { stream }))
    }
}

/// A live WebSocket session.
pub struct WsSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedSession for WsSession {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, FeedError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => FeedFrame::Text(text.to_string()),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => FeedFrame::Text(text),
                    Err(_) => FeedFrame::Other,
                },
                Ok(Message::Pong(_)) => FeedFrame::Pong,
                Ok(Message::Ping(data)) => {
                    // The exchange pings every few minutes and drops
                    // connections that do not answer.
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(FeedError::Transport(e.to_string())));
                    }
                    FeedFrame::Other
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Server closed connection");
                    return Some(Err(FeedError::Closed));
                }
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(FeedError::Transport(e.to_string()))),
            };
            return Some(Ok(frame));
        }
    }

    async fn ping(&mut self) -> Result<(), FeedError> {
        self.stream
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stream_url() {
        let connector = BinanceConnector::default();
        assert_eq!(
            connector.url_for("BTCUSDT"),
            "wss://fstream.binance.com/ws/btcusdt@aggTrade"
        );
    }

    #[test]
    fn trims_trailing_slash() {
        let connector = BinanceConnector::new("ws://localhost:9000/ws/", "trade");
        assert_eq!(connector.url_for("ethusdt"), "ws://localhost:9000/ws/ethusdt@trade");
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let connector = BinanceConnector::new("ws://127.0.0.1:1", "aggTrade");
        let result = connector.connect("btcusdt").await;
        assert!(matches!(result, Err(FeedError::Connect(_))));
    }
}
