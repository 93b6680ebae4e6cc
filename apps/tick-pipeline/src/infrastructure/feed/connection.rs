//! Feed Connection
//!
//! One resilient streaming connection to one symbol's trade channel.
//!
//! ```text
//! Disconnected ──► Connecting ──► Streaming ──(error)──► Backoff ──┐
//!      ▲               ▲                                          │
//!      │               └──────────────(delay elapsed)─────────────┤
//!      └───────────────────(retries exhausted / cancelled)────────┘
//! ```
//!
//! Every failure (connect error, transport error, peer close, heartbeat
//! stall) counts as one attempt. The attempt counter resets as soon as a
//! session reaches `Streaming`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::codec::TradeCodec;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{FeedConnector, FeedError, FeedFrame, FeedSession, TickSink};
use crate::domain::tick::normalize_symbol;
use crate::infrastructure::metrics;

// =============================================================================
// Connection State
// =============================================================================

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected (initial and terminal state).
    Disconnected = 0,
    /// Opening a session.
    Connecting = 1,
    /// Session open, messages flowing.
    Streaming = 2,
    /// Waiting before the next attempt.
    Backoff = 3,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Streaming,
            3 => Self::Backoff,
            _ => Self::Disconnected,
        }
    }

    /// Lowercase name for health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
        }
    }
}

/// Live counters for one connection, shared with health reporting.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: AtomicU8,
    ticks_received: AtomicU64,
    malformed_messages: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl FeedStatus {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Ticks emitted since start.
    #[must_use]
    pub fn ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }

    /// Messages dropped as malformed since start.
    #[must_use]
    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    /// Consecutive failed attempts (0 while streaming).
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Events and Outcomes
// =============================================================================

/// Lifecycle notifications published by connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A session reached `Streaming`.
    Connected {
        /// Symbol.
        symbol: String,
    },
    /// A session ended with an error.
    Disconnected {
        /// Symbol.
        symbol: String,
        /// Error description.
        reason: String,
    },
    /// Backing off before another attempt.
    Reconnecting {
        /// Symbol.
        symbol: String,
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// A message was dropped as malformed.
    Malformed {
        /// Symbol.
        symbol: String,
        /// Decode error description.
        error: String,
    },
    /// Retries exhausted; the symbol is no longer streamed.
    Abandoned {
        /// Symbol.
        symbol: String,
        /// Consecutive failures before giving up.
        attempts: u32,
    },
}

/// Why [`FeedConnection::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Stopped by cancellation.
    Cancelled,
    /// The tick sink went away.
    SinkClosed,
    /// Gave up after too many consecutive failures.
    Abandoned {
        /// Consecutive failures recorded.
        attempts: u32,
    },
}

enum SessionEnd {
    Cancelled,
    SinkClosed,
}

// =============================================================================
// Feed Connection
// =============================================================================

/// Connection tuning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedConnectionConfig {
    /// Backoff policy.
    pub reconnect: ReconnectConfig,
    /// Liveness checking.
    pub heartbeat: HeartbeatConfig,
}

/// A reconnecting trade stream for one symbol.
pub struct FeedConnection {
    symbol: String,
    connector: Arc<dyn FeedConnector>,
    config: FeedConnectionConfig,
    codec: TradeCodec,
    status: Arc<FeedStatus>,
    events: Option<mpsc::Sender<FeedEvent>>,
    cancel: CancellationToken,
}

impl FeedConnection {
    /// Create a connection for `symbol` (normalized to lowercase).
    #[must_use]
    pub fn new(
        symbol: impl AsRef<str>,
        connector: Arc<dyn FeedConnector>,
        config: FeedConnectionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            symbol: normalize_symbol(symbol.as_ref()),
            connector,
            config,
            codec: TradeCodec::new(),
            status: Arc::new(FeedStatus::default()),
            events: None,
            cancel,
        }
    }

    /// Publish lifecycle events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<FeedEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Symbol this connection streams.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Shared status counters.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// Stream ticks into `sink` until cancelled, the sink closes, or retries
    /// are exhausted.
    pub async fn run(&self, sink: &dyn TickSink) -> ConnectionOutcome {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break ConnectionOutcome::Cancelled;
            }

            self.status.set_state(ConnectionState::Connecting);
            let error = match self.connect_and_stream(sink, &mut policy).await {
                Ok(SessionEnd::Cancelled) => break ConnectionOutcome::Cancelled,
                Ok(SessionEnd::SinkClosed) => break ConnectionOutcome::SinkClosed,
                Err(e) => e,
            };

            metrics::set_feed_streaming(&self.symbol, false);
            tracing::warn!(symbol = %self.symbol, error = %error, "Feed connection error");
            self.publish(FeedEvent::Disconnected {
                symbol: self.symbol.clone(),
                reason: error.to_string(),
            });

            let Some(delay) = policy.next_delay() else {
                break self.abandon(policy.attempt_count());
            };
            let attempt = policy.attempt_count();
            self.status.reconnect_attempts.store(attempt, Ordering::Relaxed);
            self.status.set_state(ConnectionState::Backoff);
            metrics::record_reconnect(&self.symbol);
            tracing::info!(
                symbol = %self.symbol,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to trade stream"
            );
            self.publish(FeedEvent::Reconnecting {
                symbol: self.symbol.clone(),
                attempt,
                delay,
            });

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(symbol = %self.symbol, "Cancelled during reconnect delay");
                    break ConnectionOutcome::Cancelled;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if !policy.should_retry() {
                break self.abandon(attempt);
            }
        };

        self.status.set_state(ConnectionState::Disconnected);
        metrics::set_feed_streaming(&self.symbol, false);
        outcome
    }

    fn abandon(&self, attempts: u32) -> ConnectionOutcome {
        tracing::error!(
            symbol = %self.symbol,
            attempts,
            "Reconnect attempts exhausted, abandoning symbol"
        );
        metrics::record_feed_abandoned(&self.symbol);
        self.publish(FeedEvent::Abandoned {
            symbol: self.symbol.clone(),
            attempts,
        });
        ConnectionOutcome::Abandoned { attempts }
    }

    /// Open one session and pump it until it ends.
    async fn connect_and_stream(
        &self,
        sink: &dyn TickSink,
        policy: &mut ReconnectPolicy,
    ) -> Result<SessionEnd, FeedError> {
        tracing::info!(symbol = %self.symbol, "Connecting to trade stream");

        let mut session = tokio::select! {
            () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            session = self.connector.connect(&self.symbol) => session?,
        };

        policy.reset();
        self.status.reconnect_attempts.store(0, Ordering::Relaxed);
        self.status.set_state(ConnectionState::Streaming);
        metrics::set_feed_streaming(&self.symbol, true);
        tracing::info!(symbol = %self.symbol, "Trade stream connected");
        self.publish(FeedEvent::Connected {
            symbol: self.symbol.clone(),
        });

        let result = self.stream(session.as_mut(), sink).await;
        session.close().await;
        result
    }

    async fn stream(
        &self,
        session: &mut dyn FeedSession,
        sink: &dyn TickSink,
    ) -> Result<SessionEnd, FeedError> {
        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => session.ping().await?,
                    HeartbeatEvent::Timeout => return Err(FeedError::HeartbeatTimeout),
                },
                frame = session.next_frame() => match frame {
                    Some(Ok(FeedFrame::Text(text))) => {
                        heartbeat_state.pause();
                        let handled = self.handle_text(&text, sink).await;
                        heartbeat_state.resume();
                        if handled.is_err() {
                            return Ok(SessionEnd::SinkClosed);
                        }
                    }
                    Some(Ok(FeedFrame::Pong | FeedFrame::Other)) => {
                        heartbeat_state.record_activity();
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(FeedError::Closed),
                },
            }
        }
    }

    /// Decode a text frame and emit any tick it carries.
    ///
    /// Malformed messages are logged and counted; only a closed sink is an
    /// error here.
    async fn handle_text(
        &self,
        text: &str,
        sink: &dyn TickSink,
    ) -> Result<(), crate::application::ports::SinkClosed> {
        match self.codec.decode(text) {
            Ok(Some(tick)) => {
                self.status.ticks_received.fetch_add(1, Ordering::Relaxed);
                metrics::record_tick_received(&self.symbol);
                sink.emit(tick).await
            }
            Ok(None) => {
                tracing::trace!(symbol = %self.symbol, "Ignoring non-trade message");
                Ok(())
            }
            Err(e) => {
                self.status.malformed_messages.fetch_add(1, Ordering::Relaxed);
                metrics::record_malformed_message(&self.symbol);
                tracing::warn!(symbol = %self.symbol, error = %e, "Dropping malformed message");
                self.publish(FeedEvent::Malformed {
                    symbol: self.symbol.clone(),
                    error: e.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Status events are best-effort; a slow observer must not stall ingestion.
    fn publish(&self, event: FeedEvent) {
        if let Some(events) = &self.events
            && events.try_send(event).is_err()
        {
            tracing::trace!(symbol = %self.symbol, "Feed event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::domain::tick::Tick;

    /// Scripted outcome of one `connect` call.
    enum Script {
        Fail,
        Session(Vec<Option<Result<FeedFrame, FeedError>>>),
        /// Connect succeeds and then never yields a frame.
        Silent,
    }

    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Script>>,
        connects: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                connects: Mutex::new(Vec::new()),
            })
        }

        fn connect_times(&self) -> Vec<Instant> {
            self.connects.lock().clone()
        }
    }

    struct ScriptedSession {
        frames: VecDeque<Option<Result<FeedFrame, FeedError>>>,
        silent: bool,
    }

    #[async_trait]
    impl FeedConnector for ScriptedConnector {
        async fn connect(&self, _symbol: &str) -> Result<Box<dyn FeedSession>, FeedError> {
            self.connects.lock().push(Instant::now());
            match self.scripts.lock().pop_front() {
                Some(Script::Session(frames)) => Ok(Box::new(ScriptedSession {
                    frames: frames.into(),
                    silent: false,
                })),
                Some(Script::Silent) => Ok(Box::new(ScriptedSession {
                    frames: VecDeque::new(),
                    silent: true,
                })),
                Some(Script::Fail) | None => Err(FeedError::Connect("refused".into())),
            }
        }
    }

    #[async_trait]
    impl FeedSession for ScriptedSession {
        async fn next_frame(&mut self) -> Option<Result<FeedFrame, FeedError>> {
            if self.silent {
                return std::future::pending().await;
            }
            match self.frames.pop_front() {
                Some(frame) => frame,
                // Scripts that run dry idle rather than end, so tests control closure.
                None => std::future::pending().await,
            }
        }

        async fn ping(&mut self) -> Result<(), FeedError> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn text(symbol: &str, price: &str, ts: i64) -> Option<Result<FeedFrame, FeedError>> {
        Some(Ok(FeedFrame::Text(format!(
            r#"{{"e":"aggTrade","s":"{symbol}","p":"{price}","q":"1","T":{ts}}}"#
        ))))
    }

    fn connection(connector: Arc<ScriptedConnector>, cancel: &CancellationToken) -> FeedConnection {
        FeedConnection::new(
            "btcusdt",
            connector,
            FeedConnectionConfig::default(),
            cancel.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn abandons_after_five_failures_with_capped_backoff() {
        let connector = ScriptedConnector::new(vec![]);
        let cancel = CancellationToken::new();
        let conn = connection(Arc::clone(&connector), &cancel);
        let (tx, _rx) = mpsc::channel::<Tick>(8);

        let start = Instant::now();
        let outcome = conn.run(&tx).await;

        assert_eq!(outcome, ConnectionOutcome::Abandoned { attempts: 5 });
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let offsets: Vec<u64> = connector
            .connect_times()
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        // Attempts at 0, then after 2, 4, 8 and 16 second waits; the fifth
        // failure's 30s wait is served before giving up.
        assert_eq!(offsets, vec![0, 2, 6, 14, 30]);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_connect_resets_attempts() {
        let connector = ScriptedConnector::new(vec![
            Script::Fail,
            Script::Fail,
            Script::Session(vec![text("BTCUSDT", "10", 1), Some(Err(FeedError::Closed))]),
            Script::Fail,
        ]);
        let cancel = CancellationToken::new();
        let conn = connection(Arc::clone(&connector), &cancel);
        let (tx, mut rx) = mpsc::channel::<Tick>(8);

        let start = Instant::now();
        let outcome = conn.run(&tx).await;

        assert_eq!(outcome, ConnectionOutcome::Abandoned { attempts: 5 });
        assert_eq!(rx.recv().await.unwrap().price(), 10.0);

        let offsets: Vec<u64> = connector
            .connect_times()
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        // Fail (2s), fail (4s), stream then close: counter resets, so the
        // next wait is 2s again.
        assert_eq!(offsets, vec![0, 2, 6, 8, 12, 20, 36]);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_messages_do_not_end_the_session() {
        let connector = ScriptedConnector::new(vec![Script::Session(vec![
            Some(Ok(FeedFrame::Text("{garbage".into()))),
            Some(Ok(FeedFrame::Text(r#"{"e":"kline"}"#.into()))),
            text("BTCUSDT", "-3", 1),
            text("BTCUSDT", "42", 2),
        ])]);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<Tick>(8);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let conn = Arc::new(connection(connector, &cancel).with_events(event_tx));

        let runner = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.run(&tx).await })
        };

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.price(), 42.0);
        assert_eq!(tick.timestamp_ms(), 2);
        assert_eq!(conn.status().malformed_messages(), 2);
        assert_eq!(conn.status().ticks_received(), 1);
        assert_eq!(conn.state(), ConnectionState::Streaming);

        cancel.cancel();
        assert_eq!(runner.await.unwrap(), ConnectionOutcome::Cancelled);

        let mut malformed = 0;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, FeedEvent::Malformed { .. }) {
                malformed += 1;
            }
        }
        assert_eq!(malformed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_session_is_reconnected() {
        let connector = ScriptedConnector::new(vec![
            Script::Silent,
            Script::Session(vec![text("BTCUSDT", "5", 1)]),
        ]);
        let cancel = CancellationToken::new();
        let conn = connection(Arc::clone(&connector), &cancel);
        let (tx, mut rx) = mpsc::channel::<Tick>(8);

        let start = Instant::now();
        let runner = tokio::spawn(async move { conn.run(&tx).await });

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.price(), 5.0);

        // Ping at 20s, stall declared at 30s, 2s backoff, reconnect at 32s.
        let offsets: Vec<u64> = connector
            .connect_times()
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 32]);

        cancel.cancel();
        assert_eq!(runner.await.unwrap(), ConnectionOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_downstream_is_not_a_stall() {
        let connector = ScriptedConnector::new(vec![Script::Session(vec![
            text("BTCUSDT", "1", 1),
            text("BTCUSDT", "2", 2),
        ])]);
        let cancel = CancellationToken::new();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let conn = Arc::new(connection(Arc::clone(&connector), &cancel).with_events(event_tx));
        // Room for one tick: the second emit waits on the consumer.
        let (tx, mut rx) = mpsc::channel::<Tick>(1);

        let runner = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.run(&tx).await })
        };

        // Well past ping interval plus pong timeout.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.recv().await.unwrap().price(), 1.0);
        assert_eq!(rx.recv().await.unwrap().price(), 2.0);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.connect_times().len(), 1);
        assert_eq!(conn.state(), ConnectionState::Streaming);
        while let Ok(event) = event_rx.try_recv() {
            assert!(matches!(event, FeedEvent::Connected { .. }), "{event:?}");
        }

        cancel.cancel();
        assert_eq!(runner.await.unwrap(), ConnectionOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let connector = ScriptedConnector::new(vec![]);
        let cancel = CancellationToken::new();
        let conn = Arc::new(connection(connector, &cancel));
        let (tx, _rx) = mpsc::channel::<Tick>(8);

        let runner = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.run(&tx).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(conn.state(), ConnectionState::Backoff);

        cancel.cancel();
        assert_eq!(runner.await.unwrap(), ConnectionOutcome::Cancelled);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_sink_ends_connection() {
        let connector =
            ScriptedConnector::new(vec![Script::Session(vec![text("BTCUSDT", "1", 1)])]);
        let cancel = CancellationToken::new();
        let conn = connection(connector, &cancel);
        let (tx, rx) = mpsc::channel::<Tick>(8);
        drop(rx);

        assert_eq!(conn.run(&tx).await, ConnectionOutcome::SinkClosed);
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Streaming.as_str(), "streaming");
        assert_eq!(ConnectionState::from_u8(3), ConnectionState::Backoff);
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Disconnected);
    }
}
