//! Feed Supervisor
//!
//! Runs one [`FeedConnection`] per configured symbol, all emitting into a
//! single tick channel. Connections are isolated: one symbol being
//! abandoned leaves the others streaming.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{
    ConnectionOutcome, ConnectionState, FeedConnection, FeedConnectionConfig, FeedEvent,
    FeedStatus,
};
use super::heartbeat::HeartbeatConfig;
use super::reconnect::ReconnectConfig;
use crate::application::ports::FeedConnector;
use crate::domain::tick::{Tick, normalize_symbol};
use crate::infrastructure::config::FeedSettings;

/// How long [`FeedSupervisor::stop`] waits for connections to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervisor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Per-connection settings.
    pub connection: FeedConnectionConfig,
    /// Capacity of the shared tick channel.
    pub channel_capacity: usize,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connection: FeedConnectionConfig::default(),
            channel_capacity: 4096,
            event_capacity: 256,
        }
    }
}

impl SupervisorConfig {
    /// Build from feed settings.
    #[must_use]
    pub fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            connection: FeedConnectionConfig {
                reconnect: ReconnectConfig::from_feed_settings(settings),
                heartbeat: HeartbeatConfig::from_feed_settings(settings),
            },
            channel_capacity: settings.channel_capacity,
            ..Self::default()
        }
    }
}

/// Point-in-time view of one symbol's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolStatus {
    /// Normalized symbol.
    pub symbol: String,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Ticks emitted.
    pub ticks_received: u64,
    /// Messages dropped as malformed.
    pub malformed_messages: u64,
    /// Consecutive failed attempts.
    pub reconnect_attempts: u32,
    /// Retries exhausted.
    pub abandoned: bool,
}

/// Owns the per-symbol connection tasks.
pub struct FeedSupervisor {
    statuses: Vec<(String, Arc<FeedStatus>)>,
    degraded: Arc<RwLock<BTreeSet<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FeedSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSupervisor")
            .field("symbols", &self.symbols())
            .field("degraded", &*self.degraded.read())
            .finish_non_exhaustive()
    }
}

impl FeedSupervisor {
    /// Spawn a connection per symbol.
    ///
    /// Symbols are normalized and de-duplicated. The tick receiver yields
    /// `None` once every connection has stopped.
    pub fn start(
        connector: Arc<dyn FeedConnector>,
        symbols: &[String],
        config: SupervisorConfig,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<Tick>, mpsc::Receiver<FeedEvent>) {
        let (tick_tx, tick_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let cancel = parent.child_token();
        let degraded = Arc::new(RwLock::new(BTreeSet::new()));

        let mut seen = BTreeSet::new();
        let mut statuses = Vec::new();
        let mut tasks = Vec::new();

        for symbol in symbols.iter().map(|s| normalize_symbol(s)) {
            if symbol.is_empty() || !seen.insert(symbol.clone()) {
                continue;
            }

            let connection = FeedConnection::new(
                symbol.clone(),
                Arc::clone(&connector),
                config.connection.clone(),
                cancel.clone(),
            )
            .with_events(event_tx.clone());
            statuses.push((symbol.clone(), connection.status()));

            let tick_tx = tick_tx.clone();
            let degraded = Arc::clone(&degraded);
            tasks.push(tokio::spawn(async move {
                let outcome = connection.run(&tick_tx).await;
                match outcome {
                    ConnectionOutcome::Abandoned { attempts } => {
                        degraded.write().insert(symbol.clone());
                        tracing::error!(symbol = %symbol, attempts, "Symbol degraded");
                    }
                    ConnectionOutcome::SinkClosed => {
                        tracing::warn!(symbol = %symbol, "Tick sink closed, connection stopped");
                    }
                    ConnectionOutcome::Cancelled => {
                        tracing::debug!(symbol = %symbol, "Connection stopped");
                    }
                }
            }));
        }

        tracing::info!(symbols = ?seen, "Feed supervisor started");

        let supervisor = Self {
            statuses,
            degraded,
            tasks: Mutex::new(tasks),
            cancel,
        };
        (supervisor, tick_rx, event_rx)
    }

    /// Symbols being supervised, in configuration order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.statuses.iter().map(|(s, _)| s.clone()).collect()
    }

    /// Snapshot of every connection.
    #[must_use]
    pub fn statuses(&self) -> Vec<SymbolStatus> {
        let degraded = self.degraded.read();
        self.statuses
            .iter()
            .map(|(symbol, status)| SymbolStatus {
                symbol: symbol.clone(),
                state: status.state(),
                ticks_received: status.ticks_received(),
                malformed_messages: status.malformed_messages(),
                reconnect_attempts: status.reconnect_attempts(),
                abandoned: degraded.contains(symbol),
            })
            .collect()
    }

    /// Symbols whose connections gave up.
    #[must_use]
    pub fn degraded_symbols(&self) -> Vec<String> {
        self.degraded.read().iter().cloned().collect()
    }

    /// Whether every connection task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.lock().iter().all(JoinHandle::is_finished)
    }

    /// Cancel all connections and wait for them to exit.
    ///
    /// Tasks still running after a short grace period are aborted.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(STOP_TIMEOUT, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = STOP_TIMEOUT.as_secs(),
                "Feed connections did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        tracing::info!("Feed supervisor stopped");
    }
}
