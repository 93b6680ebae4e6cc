//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`FeedConnector`] / [`FeedSession`]: streaming transport to the exchange
//! - [`TickRepository`]: durable tick storage
//! - [`TickPublisher`]: fan-out of ingested ticks
//! - [`SubscriberSink`]: one live subscriber's delivery channel
//!
//! ## Driver Ports (Inbound)
//!
//! - [`TickSink`]: where a feed connection emits normalized ticks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::streaming::StreamEvent;
use crate::domain::tick::Tick;

// =============================================================================
// Feed Transport
// =============================================================================

/// Transport-level feed failures. All of them are retried by the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Socket or protocol error on an established connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote end closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// No traffic after an outstanding ping.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

/// A frame read from a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    /// Text payload to decode.
    Text(String),
    /// Reply to one of our pings.
    Pong,
    /// Any other frame; still counts as liveness.
    Other,
}

/// Opens sessions to one symbol's trade stream.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Connect to the stream for `symbol`.
    async fn connect(&self, symbol: &str) -> Result<Box<dyn FeedSession>, FeedError>;
}

/// An established streaming session.
#[async_trait]
pub trait FeedSession: Send {
    /// Next frame, or `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, FeedError>>;

    /// Send a liveness ping.
    async fn ping(&mut self) -> Result<(), FeedError>;

    /// Close the session. Errors are ignored.
    async fn close(&mut self);
}

// =============================================================================
// Tick Emission
// =============================================================================

/// The downstream consumer of a feed connection has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tick sink closed")]
pub struct SinkClosed;

/// Receives normalized ticks from a feed connection.
#[async_trait]
pub trait TickSink: Send + Sync {
    /// Hand over one tick. Resolves once the sink has accepted it.
    async fn emit(&self, tick: Tick) -> Result<(), SinkClosed>;
}

#[async_trait]
impl TickSink for mpsc::Sender<Tick> {
    async fn emit(&self, tick: Tick) -> Result<(), SinkClosed> {
        self.send(tick).await.map_err(|_| SinkClosed)
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be turned back into a tick.
    #[error("corrupt row {id}: {reason}")]
    CorruptRow {
        /// Row identifier.
        id: i64,
        /// Why it was rejected.
        reason: String,
    },

    /// The blocking task running the query did not complete.
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Durable, append-only tick storage.
///
/// Implementations are synchronous; async callers run them on the blocking
/// pool. Reads return ticks oldest first by timestamp, ties broken by
/// insertion order.
pub trait TickRepository: Send + Sync {
    /// Append one tick.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn insert(&self, tick: &Tick) -> Result<(), StoreError>;

    /// Up to `limit` newest ticks for `symbol` by timestamp, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>, StoreError>;

    /// Ticks for `symbol` with `start <= timestamp <= end`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Tick>, StoreError>;

    /// Number of stored ticks for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn count(&self, symbol: &str) -> Result<u64, StoreError>;

    /// Delete ticks inserted before `older_than`; returns rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn purge(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Distinct symbols with stored ticks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn symbols(&self) -> Result<Vec<String>, StoreError>;
}

// =============================================================================
// Fan-out
// =============================================================================

/// Publishes ingested ticks to live subscribers.
#[async_trait]
pub trait TickPublisher: Send + Sync {
    /// Publish one tick; returns how many subscribers accepted it.
    async fn publish(&self, tick: &Tick) -> usize;
}

/// Why a subscriber could not take an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The subscriber has disconnected.
    #[error("subscriber closed")]
    Closed,

    /// The subscriber did not accept the event in time.
    #[error("delivery timed out")]
    Timeout,

    /// Transport-specific failure.
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// One subscriber's outbound channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    /// Deliver one event.
    async fn deliver(&self, event: &StreamEvent) -> Result<(), DeliveryError>;
}
