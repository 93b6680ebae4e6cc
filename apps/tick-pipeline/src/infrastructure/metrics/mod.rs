//! Prometheus Metrics
//!
//! Pipeline metrics via the `metrics` facade, rendered at `/metrics` on the
//! health server.
//!
//! # Metrics Categories
//!
//! - **Feed**: ticks received, malformed messages, reconnects, abandoned symbols
//! - **Store**: ticks persisted, storage errors
//! - **Broadcast**: deliveries, evictions, subscriber count
//! - **Latency**: per-tick ingest time (persist + fan-out)
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder, so
//! library code and tests can call these freely.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Idempotent: later calls return the handle from the first.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "tick_pipeline_ticks_received_total",
        "Ticks normalized from the exchange feed"
    );
    describe_counter!(
        "tick_pipeline_malformed_messages_total",
        "Feed messages dropped as malformed"
    );
    describe_counter!(
        "tick_pipeline_reconnects_total",
        "Feed reconnection attempts"
    );
    describe_counter!(
        "tick_pipeline_feeds_abandoned_total",
        "Symbols abandoned after exhausting reconnect attempts"
    );
    describe_gauge!(
        "tick_pipeline_feed_streaming",
        "1 while a symbol's connection is streaming"
    );

    // Store
    describe_counter!(
        "tick_pipeline_ticks_persisted_total",
        "Ticks written to the tick store"
    );
    describe_counter!(
        "tick_pipeline_store_errors_total",
        "Tick store failures by operation"
    );

    // Broadcast
    describe_counter!(
        "tick_pipeline_events_delivered_total",
        "Events delivered to subscribers by kind"
    );
    describe_counter!(
        "tick_pipeline_subscribers_evicted_total",
        "Subscribers evicted by reason"
    );
    describe_gauge!(
        "tick_pipeline_subscribers",
        "Currently registered subscribers"
    );

    // Latency
    describe_histogram!(
        "tick_pipeline_ingest_seconds",
        "Time to persist and fan out one tick"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Why a subscriber was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Receiving end closed.
    Closed,
    /// Did not accept an event within the send timeout.
    Timeout,
    /// Transport error.
    Failed,
}

impl EvictionReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
        }
    }
}

/// Tick store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Insert.
    Insert,
    /// Any read.
    Read,
    /// Retention purge.
    Purge,
}

impl StoreOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Read => "read",
            Self::Purge => "purge",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a tick normalized from the feed.
pub fn record_tick_received(symbol: &str) {
    counter!("tick_pipeline_ticks_received_total", "symbol" => symbol.to_string()).increment(1);
}

/// Record a dropped malformed message.
pub fn record_malformed_message(symbol: &str) {
    counter!("tick_pipeline_malformed_messages_total", "symbol" => symbol.to_string())
        .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(symbol: &str) {
    counter!("tick_pipeline_reconnects_total", "symbol" => symbol.to_string()).increment(1);
}

/// Record a symbol being abandoned.
pub fn record_feed_abandoned(symbol: &str) {
    counter!("tick_pipeline_feeds_abandoned_total", "symbol" => symbol.to_string()).increment(1);
}

/// Mark a symbol's connection as streaming or not.
pub fn set_feed_streaming(symbol: &str, streaming: bool) {
    gauge!("tick_pipeline_feed_streaming", "symbol" => symbol.to_string())
        .set(if streaming { 1.0 } else { 0.0 });
}

/// Record a tick written to the store.
pub fn record_tick_persisted() {
    counter!("tick_pipeline_ticks_persisted_total").increment(1);
}

/// Record a store failure.
pub fn record_store_error(operation: StoreOperation) {
    counter!(
        "tick_pipeline_store_errors_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record events of `kind` delivered in one broadcast.
pub fn record_events_delivered(kind: &'static str, count: u64) {
    counter!("tick_pipeline_events_delivered_total", "kind" => kind).increment(count);
}

/// Record an evicted subscriber.
pub fn record_subscriber_evicted(reason: EvictionReason) {
    counter!(
        "tick_pipeline_subscribers_evicted_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("tick_pipeline_subscribers").set(count as f64);
}

/// Record ingest duration for one tick.
pub fn record_ingest_duration(duration: Duration) {
    histogram!("tick_pipeline_ingest_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::StreamEvent;

    #[test]
    fn eviction_reason_as_str() {
        assert_eq!(EvictionReason::Closed.as_str(), "closed");
        assert_eq!(EvictionReason::Timeout.as_str(), "timeout");
        assert_eq!(EvictionReason::Failed.as_str(), "failed");
    }

    #[test]
    fn store_operation_as_str() {
        assert_eq!(StoreOperation::Insert.as_str(), "insert");
        assert_eq!(StoreOperation::Read.as_str(), "read");
        assert_eq!(StoreOperation::Purge.as_str(), "purge");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_tick_received("btcusdt");
        set_feed_streaming("btcusdt", true);
        record_ingest_duration(Duration::from_millis(3));
        record_events_delivered(StreamEvent::Ping.kind(), 2);
    }
}
