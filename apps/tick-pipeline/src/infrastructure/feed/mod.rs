//! Exchange Feed
//!
//! Resilient per-symbol trade streams.
//!
//! - [`codec`]: exchange JSON to [`Tick`](crate::domain::tick::Tick)
//! - [`reconnect`]: capped exponential backoff
//! - [`heartbeat`]: ping scheduling and stall detection
//! - [`connection`]: one symbol's reconnecting stream
//! - [`supervisor`]: one connection per configured symbol
//! - [`websocket`]: `tokio-tungstenite` transport

pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod reconnect;
pub mod supervisor;
pub mod websocket;

pub use codec::{CodecError, TradeCodec};
pub use connection::{
    ConnectionOutcome, ConnectionState, FeedConnection, FeedConnectionConfig, FeedEvent,
    FeedStatus,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{FeedSupervisor, SupervisorConfig, SymbolStatus};
pub use websocket::{BinanceConnector, WsSession};
