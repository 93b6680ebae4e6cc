//! Heartbeat Manager
//!
//! Detects stalled feed connections. A ping is requested every
//! `ping_interval`; if no inbound frame of any kind arrives within
//! `pong_timeout` of that ping, the manager reports a timeout and exits.
//!
//! While the reader is blocked handing a tick downstream it cannot observe
//! inbound frames, so the connection pauses the heartbeat for that time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::FeedSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Build from feed settings.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping now.
    SendPing,
    /// The last ping went unanswered; the connection is stalled.
    Timeout,
}

/// Liveness state shared between the manager and the reader loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_ping: RwLock<Instant>,
    waiting_for_pong: AtomicBool,
    paused: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state with no outstanding ping.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_ping: RwLock::new(Instant::now()),
            waiting_for_pong: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Record inbound traffic (a pong or any other frame).
    pub fn record_activity(&self) {
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Record that a ping is outstanding as of now.
    pub fn mark_ping_sent(&self) {
        *self.last_ping.write() = Instant::now();
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Stop counting silence against the connection.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume stall detection. Any outstanding ping is forgotten.
    pub fn resume(&self) {
        self.record_activity();
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Whether stall detection is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// When the outstanding ping expires, if there is one.
    #[must_use]
    pub fn pong_deadline(&self, timeout: Duration) -> Option<Instant> {
        (self.is_waiting_for_pong() && !self.is_paused())
            .then(|| *self.last_ping.read() + timeout)
    }

    /// Whether the outstanding ping has gone unanswered for `timeout`.
    #[must_use]
    pub fn is_overdue(&self, timeout: Duration) -> bool {
        self.is_waiting_for_pong()
            && !self.is_paused()
            && self.last_ping.read().elapsed() >= timeout
    }
}

/// Drives pings and stall detection for one connection.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes, or a timeout fires.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the connection is fresh.
        interval.tick().await;

        loop {
            let deadline = self.state.pong_deadline(self.config.pong_timeout);

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                () = wait_until(deadline) => {
                    if self.state.is_overdue(self.config.pong_timeout) {
                        tracing::warn!(
                            timeout_secs = self.config.pong_timeout.as_secs(),
                            "Heartbeat timeout detected"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                        break;
                    }
                }
                _ = interval.tick() => {
                    if self.state.is_waiting_for_pong() || self.state.is_paused() {
                        continue;
                    }
                    self.state.mark_ping_sent();
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_manager(
        config: HeartbeatConfig,
    ) -> (
        Arc<HeartbeatState>,
        mpsc::Receiver<HeartbeatEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, Arc::clone(&state), event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());
        (state, event_rx, cancel, handle)
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.pong_timeout, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn state_tracks_outstanding_ping() {
        let state = HeartbeatState::new();
        assert!(!state.is_waiting_for_pong());
        assert!(state.pong_deadline(Duration::from_secs(10)).is_none());

        state.mark_ping_sent();
        assert!(state.is_waiting_for_pong());
        assert!(!state.is_overdue(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(state.is_overdue(Duration::from_secs(10)));

        state.record_activity();
        assert!(!state.is_waiting_for_pong());
        assert!(!state.is_overdue(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_after_one_interval() {
        let (_state, mut events, cancel, handle) =
            spawn_manager(HeartbeatConfig::new(Duration::from_secs(20), Duration::from_secs(10)));

        let started = Instant::now();
        assert_eq!(events.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(started.elapsed(), Duration::from_secs(20));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_pong_timeout_after_ping() {
        let (_state, mut events, _cancel, handle) =
            spawn_manager(HeartbeatConfig::new(Duration::from_secs(20), Duration::from_secs(10)));

        let started = Instant::now();
        assert_eq!(events.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(events.recv().await, Some(HeartbeatEvent::Timeout));
        assert_eq!(started.elapsed(), Duration::from_secs(30));

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_keeps_connection_alive() {
        let (state, mut events, cancel, handle) =
            spawn_manager(HeartbeatConfig::new(Duration::from_secs(20), Duration::from_secs(10)));

        for _ in 0..3 {
            assert_eq!(events.recv().await, Some(HeartbeatEvent::SendPing));
            tokio::time::advance(Duration::from_secs(5)).await;
            state.record_activity();
        }

        cancel.cancel();
        handle.await.unwrap();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event, HeartbeatEvent::SendPing);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paused_state_never_times_out() {
        let (state, mut events, cancel, handle) =
            spawn_manager(HeartbeatConfig::new(Duration::from_secs(20), Duration::from_secs(10)));

        assert_eq!(events.recv().await, Some(HeartbeatEvent::SendPing));
        state.pause();
        assert!(state.pong_deadline(Duration::from_secs(10)).is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(events.try_recv().is_err());
        assert!(!handle.is_finished());

        state.resume();
        assert!(!state.is_waiting_for_pong());
        assert_eq!(events.recv().await, Some(HeartbeatEvent::SendPing));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_manager() {
        let (_state, _events, cancel, handle) =
            spawn_manager(HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(10)));

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
