//! Tick ingestion.
//!
//! Each tick is persisted (on the blocking pool) and fanned out
//! concurrently. Ticks are processed one at a time, so per-symbol order is
//! kept in the store and at every subscriber.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{StoreError, TickPublisher, TickRepository};
use crate::domain::tick::Tick;
use crate::infrastructure::metrics::{self, StoreOperation};

/// What happened to one ingested tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The tick reached the store.
    pub persisted: bool,
    /// Subscribers that accepted it.
    pub delivered: usize,
}

/// Running totals.
#[derive(Debug, Default)]
pub struct PipelineStats {
    ingested: AtomicU64,
    persisted: AtomicU64,
    store_errors: AtomicU64,
}

impl PipelineStats {
    /// Ticks processed.
    #[must_use]
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    /// Ticks written to the store.
    #[must_use]
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Failed writes.
    #[must_use]
    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }
}

/// Owns one store and one publisher.
pub struct Pipeline {
    store: Arc<dyn TickRepository>,
    publisher: Arc<dyn TickPublisher>,
    stats: PipelineStats,
}

impl Pipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(store: Arc<dyn TickRepository>, publisher: Arc<dyn TickPublisher>) -> Self {
        Self {
            store,
            publisher,
            stats: PipelineStats::default(),
        }
    }

    /// Running totals.
    #[must_use]
    pub const fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Persist and publish one tick.
    ///
    /// Storage failures are logged and counted; the tick is still published.
    pub async fn ingest(&self, tick: Tick) -> IngestOutcome {
        let started = Instant::now();
        let store = Arc::clone(&self.store);
        let stored = tick.clone();

        let (write, delivered) = tokio::join!(
            tokio::task::spawn_blocking(move || store.insert(&stored)),
            self.publisher.publish(&tick),
        );

        let write = write.unwrap_or_else(|e| Err(StoreError::Task(e.to_string())));
        let persisted = match write {
            Ok(()) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                metrics::record_tick_persisted();
                true
            }
            Err(e) => {
                self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_store_error(StoreOperation::Insert);
                tracing::warn!(symbol = %tick.symbol(), error = %e, "Failed to persist tick");
                false
            }
        };

        self.stats.ingested.fetch_add(1, Ordering::Relaxed);
        metrics::record_ingest_duration(started.elapsed());
        IngestOutcome {
            persisted,
            delivered,
        }
    }

    /// Ingest ticks until the channel closes or `cancel` fires.
    ///
    /// Returns the number of ticks ingested by this call.
    pub async fn run(&self, mut ticks: mpsc::Receiver<Tick>, cancel: CancellationToken) -> u64 {
        let mut count = 0u64;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(ingested = count, "Ingest loop cancelled");
                    break;
                }
                tick = ticks.recv() => match tick {
                    Some(tick) => {
                        self.ingest(tick).await;
                        count += 1;
                    }
                    None => {
                        tracing::info!(ingested = count, "Tick stream ended");
                        break;
                    }
                },
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::infrastructure::store::TickStore;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Tick>>,
    }

    #[async_trait]
    impl TickPublisher for RecordingPublisher {
        async fn publish(&self, tick: &Tick) -> usize {
            self.published.lock().push(tick.clone());
            1
        }
    }

    /// Rejects every write.
    struct BrokenStore;

    impl TickRepository for BrokenStore {
        fn insert(&self, _tick: &Tick) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }
        fn recent(&self, _symbol: &str, _limit: usize) -> Result<Vec<Tick>, StoreError> {
            Ok(Vec::new())
        }
        fn range(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Tick>, StoreError> {
            Ok(Vec::new())
        }
        fn count(&self, _symbol: &str) -> Result<u64, StoreError> {
            Ok(0)
        }
        fn purge(&self, _older_than: DateTime<Utc>) -> Result<usize, StoreError> {
            Ok(0)
        }
        fn symbols(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn tick(symbol: &str, ms: i64, price: f64) -> Tick {
        Tick::from_millis(symbol, ms, price, 1.0).unwrap()
    }

    #[tokio::test]
    async fn ingest_persists_and_publishes() {
        let store = Arc::new(TickStore::in_memory().unwrap());
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = Pipeline::new(store.clone(), publisher.clone());

        let outcome = pipeline.ingest(tick("btcusdt", 1, 100.0)).await;

        assert_eq!(
            outcome,
            IngestOutcome {
                persisted: true,
                delivered: 1
            }
        );
        assert_eq!(store.count("btcusdt").unwrap(), 1);
        assert_eq!(publisher.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_still_publishes() {
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = Pipeline::new(Arc::new(BrokenStore), publisher.clone());

        let outcome = pipeline.ingest(tick("btcusdt", 1, 100.0)).await;

        assert!(!outcome.persisted);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(pipeline.stats().store_errors(), 1);
        assert_eq!(pipeline.stats().ingested(), 1);
    }

    #[tokio::test]
    async fn run_preserves_order_until_channel_closes() {
        let store = Arc::new(TickStore::in_memory().unwrap());
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = Pipeline::new(store.clone(), publisher.clone());
        let (tx, rx) = mpsc::channel(16);

        for (i, price) in [3.0, 1.0, 2.0].into_iter().enumerate() {
            tx.send(tick("ethusdt", i64::try_from(i).unwrap(), price)).await.unwrap();
        }
        drop(tx);

        let count = pipeline.run(rx, CancellationToken::new()).await;
        assert_eq!(count, 3);

        let stored: Vec<f64> = store
            .recent("ethusdt", 10)
            .unwrap()
            .iter()
            .map(Tick::price)
            .collect();
        assert_eq!(stored, vec![3.0, 1.0, 2.0]);

        let published: Vec<f64> = publisher.published.lock().iter().map(Tick::price).collect();
        assert_eq!(published, stored);
        assert_eq!(pipeline.stats().persisted(), 3);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let pipeline = Pipeline::new(
            Arc::new(TickStore::in_memory().unwrap()),
            Arc::new(RecordingPublisher::default()),
        );
        let (_tx, rx) = mpsc::channel::<Tick>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(pipeline.run(rx, cancel).await, 0);
    }
}
