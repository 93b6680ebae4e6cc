//! Subscriber Fan-out
//!
//! Delivers every ingested tick, plus keepalive pings, to a dynamic set of
//! subscribers. Each delivery is bounded by a send timeout; a subscriber
//! that fails or times out is evicted without holding up the others.
//!
//! # Locking
//!
//! The registry lock is held only to mutate the map or clone a snapshot of
//! it, never across a delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DeliveryError, SubscriberSink, TickPublisher};
use crate::domain::streaming::StreamEvent;
use crate::domain::tick::Tick;
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics::{self, EvictionReason};

// =============================================================================
// Configuration
// =============================================================================

/// Broadcaster tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Upper bound on one delivery to one subscriber.
    pub send_timeout: Duration,
    /// Idle time after which a subscriber is pinged.
    pub idle_window: Duration,
    /// How often the keepalive loop looks for idle subscribers.
    pub keepalive_interval: Duration,
    /// Channel capacity for [`Broadcaster::subscribe`].
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(1),
            idle_window: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            subscriber_buffer: 1024,
        }
    }
}

impl From<&BroadcastSettings> for BroadcastConfig {
    fn from(settings: &BroadcastSettings) -> Self {
        Self {
            send_timeout: settings.send_timeout,
            idle_window: settings.idle_window,
            keepalive_interval: settings.keepalive_interval,
            subscriber_buffer: settings.subscriber_buffer,
        }
    }
}

// =============================================================================
// Subscribers
// =============================================================================

/// Opaque subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of a channel subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<StreamEvent>,
}

impl Subscription {
    /// Handle for unsubscribing.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once evicted or unsubscribed.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Bounded-channel subscriber backing [`Broadcaster::subscribe`].
struct ChannelSubscriber {
    sender: mpsc::Sender<StreamEvent>,
}

#[async_trait]
impl SubscriberSink for ChannelSubscriber {
    async fn deliver(&self, event: &StreamEvent) -> Result<(), DeliveryError> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

struct Entry {
    sink: Arc<dyn SubscriberSink>,
    last_activity: Mutex<Instant>,
}

impl Entry {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the event.
    pub delivered: usize,
    /// Subscribers removed because delivery failed.
    pub evicted: usize,
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Registry of live subscribers.
pub struct Broadcaster {
    config: BroadcastConfig,
    subscribers: RwLock<HashMap<SubscriberId, Arc<Entry>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("config", &self.config)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}

impl Broadcaster {
    /// Create an empty broadcaster.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Add a channel subscriber with the configured buffer.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_buffer(self.config.subscriber_buffer)
    }

    /// Add a channel subscriber holding up to `buffer` undelivered events.
    #[must_use]
    pub fn subscribe_with_buffer(&self, buffer: usize) -> Subscription {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let id = self.register(Arc::new(ChannelSubscriber { sender }));
        Subscription { id, receiver }
    }

    /// Add a custom subscriber transport.
    pub fn register(&self, sink: Arc<dyn SubscriberSink>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            sink,
            last_activity: Mutex::new(Instant::now()),
        });

        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, entry);
            subscribers.len()
        };
        metrics::set_subscribers(count);
        tracing::debug!(subscriber = %id, subscribers = count, "Subscriber registered");
        id
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            metrics::set_subscribers(count);
            tracing::debug!(subscriber = %id, subscribers = count, "Subscriber removed");
        }
        removed
    }

    /// Record inbound activity from a subscriber.
    pub fn touch(&self, id: SubscriberId) {
        if let Some(entry) = self.subscribers.read().get(&id) {
            entry.touch();
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every subscriber.
    pub async fn broadcast(&self, event: &StreamEvent) -> BroadcastReport {
        let targets: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();
        self.deliver_to(targets, event).await
    }

    /// Ping every subscriber idle for at least the idle window.
    pub async fn ping_idle(&self) -> BroadcastReport {
        let idle_window = self.config.idle_window;
        let targets: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, entry)| entry.idle_for() >= idle_window)
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();
        if !targets.is_empty() {
            tracing::trace!(idle = targets.len(), "Pinging idle subscribers");
        }
        self.deliver_to(targets, &StreamEvent::Ping).await
    }

    /// Ping idle subscribers periodically until cancelled.
    pub async fn run_keepalive(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.keepalive_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Keepalive loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.ping_idle().await;
                    if report.evicted > 0 {
                        tracing::info!(
                            evicted = report.evicted,
                            "Evicted unresponsive subscribers"
                        );
                    }
                }
            }
        }
    }

    /// Drop every subscriber. Channel subscribers see their stream end.
    pub fn shutdown(&self) {
        let released = {
            let mut subscribers = self.subscribers.write();
            let released = subscribers.len();
            subscribers.clear();
            released
        };
        metrics::set_subscribers(0);
        tracing::info!(released, "Broadcaster shut down");
    }

    async fn deliver_to(
        &self,
        targets: Vec<(SubscriberId, Arc<Entry>)>,
        event: &StreamEvent,
    ) -> BroadcastReport {
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let send_timeout = self.config.send_timeout;
        let results = futures::future::join_all(targets.into_iter().map(|(id, entry)| async move {
            let result = match tokio::time::timeout(send_timeout, entry.sink.deliver(event)).await {
                Ok(Ok(())) => {
                    entry.touch();
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(DeliveryError::Timeout),
            };
            (id, result)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    if self.evict(id, event, &error) {
                        report.evicted += 1;
                    }
                }
            }
        }

        metrics::record_events_delivered(event.kind(), report.delivered as u64);
        report
    }

    fn evict(&self, id: SubscriberId, event: &StreamEvent, error: &DeliveryError) -> bool {
        if !self.unsubscribe(id) {
            return false;
        }
        let reason = match error {
            DeliveryError::Closed => EvictionReason::Closed,
            DeliveryError::Timeout => EvictionReason::Timeout,
            DeliveryError::Failed(_) => EvictionReason::Failed,
        };
        metrics::record_subscriber_evicted(reason);
        tracing::info!(
            subscriber = %id,
            event = event.kind(),
            error = %error,
            "Subscriber evicted"
        );
        true
    }
}

#[async_trait]
impl TickPublisher for Broadcaster {
    async fn publish(&self, tick: &Tick) -> usize {
        self.broadcast(&StreamEvent::Tick(tick.clone())).await.delivered
    }
}
