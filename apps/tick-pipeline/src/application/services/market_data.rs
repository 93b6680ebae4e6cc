//! Read-side queries over the tick store.
//!
//! Store calls run on the blocking pool. Storage failures are logged,
//! counted and answered with an empty result; callers never see them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{StoreError, TickRepository};
use crate::domain::analytics::{
    self, AnalyticsParams, AnalyticsResult, CorrelationResult, to_candles,
};
use crate::domain::candle::{Candle, OhlcvRow};
use crate::domain::tick::{Tick, normalize_symbol};
use crate::infrastructure::metrics::{self, StoreOperation};

/// Ticks loaded per side for correlation requests.
const CORRELATION_HISTORY: usize = 500;

/// Result of a backfill import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Rows stored as ticks.
    pub inserted: usize,
    /// Rows that failed validation or could not be written.
    pub rejected: usize,
}

/// Query facade used by the data API.
pub struct MarketDataService {
    store: Arc<dyn TickRepository>,
    params: AnalyticsParams,
    history_limit: usize,
}

impl MarketDataService {
    /// Create a service over `store`.
    ///
    /// `history_limit` bounds how many recent ticks feed one analytics call.
    #[must_use]
    pub fn new(
        store: Arc<dyn TickRepository>,
        params: AnalyticsParams,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            params,
            history_limit,
        }
    }

    /// Up to `limit` most recent ticks, oldest first.
    pub async fn recent_ticks(&self, symbol: &str, limit: usize) -> Vec<Tick> {
        let symbol = normalize_symbol(symbol);
        self.blocking(StoreOperation::Read, move |store| store.recent(&symbol, limit))
            .await
            .unwrap_or_default()
    }

    /// Ticks with `start <= timestamp <= end`, oldest first.
    pub async fn range(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Tick> {
        let symbol = normalize_symbol(symbol);
        self.blocking(StoreOperation::Read, move |store| store.range(&symbol, start, end))
            .await
            .unwrap_or_default()
    }

    /// Stored tick count for `symbol`.
    pub async fn count(&self, symbol: &str) -> u64 {
        let symbol = normalize_symbol(symbol);
        self.blocking(StoreOperation::Read, move |store| store.count(&symbol))
            .await
            .unwrap_or_default()
    }

    /// Symbols with stored ticks.
    pub async fn symbols(&self) -> Vec<String> {
        self.blocking(StoreOperation::Read, |store| store.symbols())
            .await
            .unwrap_or_default()
    }

    /// Indicator set over the most recent `history_limit` ticks.
    pub async fn analytics(&self, symbol: &str) -> AnalyticsResult {
        let symbol = normalize_symbol(symbol);
        let ticks = self.recent_ticks(&symbol, self.history_limit).await;
        analytics::analyze(&symbol, &ticks, &self.params)
    }

    /// Correlation and hedge ratio between two symbols.
    pub async fn correlation(&self, symbol1: &str, symbol2: &str) -> CorrelationResult {
        let (symbol1, symbol2) = (normalize_symbol(symbol1), normalize_symbol(symbol2));
        let (a, b) = tokio::join!(
            self.recent_ticks(&symbol1, CORRELATION_HISTORY),
            self.recent_ticks(&symbol2, CORRELATION_HISTORY),
        );
        analytics::correlate(&symbol1, &a, &symbol2, &b, &self.params)
    }

    /// Up to `limit` most recent candles of `window_seconds`, built from the
    /// most recent `history_limit` ticks.
    pub async fn candles(&self, symbol: &str, window_seconds: u64, limit: usize) -> Vec<Candle> {
        let ticks = self.recent_ticks(symbol, self.history_limit).await;
        let mut candles = to_candles(&ticks, window_seconds);
        let skip = candles.len().saturating_sub(limit);
        candles.drain(..skip);
        candles
    }

    /// Store OHLCV bars as ticks (`price = close`, `size = volume`).
    pub async fn backfill(&self, symbol: &str, rows: Vec<OhlcvRow>) -> BackfillReport {
        let symbol = normalize_symbol(symbol);
        let mut report = BackfillReport::default();

        let mut ticks = Vec::with_capacity(rows.len());
        for row in &rows {
            match row.to_tick(&symbol) {
                Ok(tick) => ticks.push(tick),
                Err(e) => {
                    tracing::debug!(
                        symbol = %symbol,
                        time = %row.time,
                        error = %e,
                        "Backfill row rejected"
                    );
                    report.rejected += 1;
                }
            }
        }

        let store = Arc::clone(&self.store);
        let writes = tokio::task::spawn_blocking(move || {
            ticks
                .iter()
                .map(|tick| store.insert(tick))
                .filter(Result::is_ok)
                .count()
        })
        .await;

        match writes {
            Ok(inserted) => {
                let failed = rows.len() - report.rejected - inserted;
                if failed > 0 {
                    metrics::record_store_error(StoreOperation::Insert);
                    tracing::warn!(symbol = %symbol, failed, "Backfill writes failed");
                }
                report.inserted = inserted;
                report.rejected += failed;
            }
            Err(e) => {
                metrics::record_store_error(StoreOperation::Insert);
                tracing::error!(symbol = %symbol, error = %e, "Backfill task failed");
                report.rejected = rows.len();
            }
        }

        tracing::info!(
            symbol = %symbol,
            inserted = report.inserted,
            rejected = report.rejected,
            "Backfill complete"
        );
        report
    }

    /// Delete ticks inserted more than `max_age` ago; returns rows removed.
    pub async fn purge_older_than(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.blocking(StoreOperation::Purge, move |store| store.purge(cutoff))
            .await
            .unwrap_or_default()
    }

    /// Purge every `interval` until cancelled.
    pub async fn run_retention(
        &self,
        cancel: CancellationToken,
        interval: Duration,
        max_age: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Retention task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = self.purge_older_than(max_age).await;
                    if removed > 0 {
                        tracing::info!(
                            removed,
                            max_age_secs = max_age.as_secs(),
                            "Purged old ticks"
                        );
                    }
                }
            }
        }
    }

    async fn blocking<T, F>(&self, operation: StoreOperation, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TickRepository) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .unwrap_or_else(|e| Err(StoreError::Task(e.to_string())));

        if let Err(e) = &result {
            metrics::record_store_error(operation);
            tracing::warn!(error = %e, "Tick store query failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::infrastructure::store::TickStore;

    /// Fails every call.
    struct FailingStore;

    impl TickRepository for FailingStore {
        fn insert(&self, _tick: &Tick) -> Result<(), StoreError> {
            Err(StoreError::Backend("locked".into()))
        }
        fn recent(&self, _symbol: &str, _limit: usize) -> Result<Vec<Tick>, StoreError> {
            Err(StoreError::Backend("locked".into()))
        }
        fn range(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Tick>, StoreError> {
            Err(StoreError::Backend("locked".into()))
        }
        fn count(&self, _symbol: &str) -> Result<u64, StoreError> {
            Err(StoreError::Backend("locked".into()))
        }
        fn purge(&self, _older_than: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Backend("locked".into()))
        }
        fn symbols(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Backend("locked".into()))
        }
    }

    fn service_with(ticks: &[(&str, i64, f64)]) -> (MarketDataService, Arc<TickStore>) {
        let store = Arc::new(TickStore::in_memory().unwrap());
        for &(symbol, ms, price) in ticks {
            store
                .insert(&Tick::from_millis(symbol, ms, price, 1.0).unwrap())
                .unwrap();
        }
        let service = MarketDataService::new(store.clone(), AnalyticsParams::default(), 500);
        (service, store)
    }

    #[tokio::test]
    async fn recent_ticks_normalizes_symbol() {
        let (service, _) = service_with(&[("btcusdt", 1, 1.0), ("btcusdt", 2, 2.0)]);

        let ticks = service.recent_ticks("BTCUSDT", 1).await;
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].price(), 2.0);
        assert_eq!(service.count(" BtcUsdt ").await, 2);
    }

    #[tokio::test]
    async fn analytics_needs_a_full_window() {
        let ticks: Vec<(&str, i64, f64)> = (0..19)
            .map(|i: i32| ("btcusdt", i64::from(i), 100.0 + f64::from(i)))
            .collect();
        let (service, store) = service_with(&ticks);

        let result = service.analytics("btcusdt").await;
        assert_eq!(result.tick_count, 19);
        assert_eq!(result.zscore, None);

        store.insert(&Tick::from_millis("btcusdt", 19, 150.0, 1.0).unwrap()).unwrap();
        let result = service.analytics("btcusdt").await;
        assert_eq!(result.tick_count, 20);
        assert!(result.zscore.unwrap() > 0.0);
        assert!(result.spread.is_some());
        assert_eq!(result.adf_pvalue, None);
    }

    #[tokio::test]
    async fn correlation_of_linear_series() {
        let mut rows = Vec::new();
        for i in 0..120 {
            let x = 100.0 + f64::from(i) * 0.5 + f64::from(i % 7);
            rows.push(("ethusdt", i64::from(i), x));
            rows.push(("btcusdt", i64::from(i), 3.0 * x + 10.0));
        }
        let (service, _) = service_with(&rows);

        let result = service.correlation("ETHUSDT", "btcusdt").await;
        assert_eq!(result.symbol1, "ethusdt");
        assert!((result.correlation.unwrap() - 1.0).abs() < 1e-9);
        assert!((result.hedge_ratio.unwrap() - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn candles_are_limited_to_most_recent() {
        // One tick every 30s for five minutes: five one-minute candles.
        let ticks: Vec<(&str, i64, f64)> = (0..10)
            .map(|i: i32| {
                let ms = 1_700_000_040_000 + i64::from(i) * 30_000;
                ("btcusdt", ms, 100.0 + f64::from(i))
            })
            .collect();
        let (service, _) = service_with(&ticks);

        let all = service.candles("btcusdt", 60, 100).await;
        assert_eq!(all.len(), 5);

        let last_two = service.candles("btcusdt", 60, 2).await;
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two, all[3..]);
    }

    #[tokio::test]
    async fn backfill_stores_close_and_volume() {
        let (service, store) = service_with(&[]);
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bar = |close: f64, volume: f64| OhlcvRow {
            time,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close,
            volume,
        };
        // Zero close and negative volume fail tick validation.
        let rows = vec![bar(1.5, 10.0), bar(0.0, 10.0), bar(1.7, -1.0)];

        let report = service.backfill("SOLUSDT", rows).await;
        assert_eq!(report, BackfillReport { inserted: 1, rejected: 2 });

        let stored = store.recent("solusdt", 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].price(), 1.5);
        assert_eq!(stored[0].size(), 10.0);
        assert_eq!(stored[0].timestamp(), time);
    }

    #[tokio::test]
    async fn backfilled_history_reads_back_before_live_ticks() {
        let (service, _) = service_with(&[("btcusdt", 2_000_000, 200.0)]);
        let earlier = OhlcvRow {
            time: Utc.timestamp_millis_opt(1_000_000).unwrap(),
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 1.0,
        };
        service.backfill("btcusdt", vec![earlier]).await;

        let stamps = |ticks: Vec<Tick>| ticks.iter().map(Tick::timestamp_ms).collect::<Vec<_>>();
        assert_eq!(
            stamps(service.recent_ticks("btcusdt", 10).await),
            vec![1_000_000, 2_000_000]
        );
        assert_eq!(
            stamps(service.recent_ticks("btcusdt", 1).await),
            vec![2_000_000]
        );
        let start = Utc.timestamp_millis_opt(0).unwrap();
        let end = Utc.timestamp_millis_opt(3_000_000).unwrap();
        assert_eq!(
            stamps(service.range("btcusdt", start, end).await),
            vec![1_000_000, 2_000_000]
        );

        let candles = service.candles("btcusdt", 3_600, 10).await;
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open, 100.0);
        assert_eq!(candles[0].close, 200.0);
    }

    #[tokio::test]
    async fn store_failures_degrade_to_empty_results() {
        let service =
            MarketDataService::new(Arc::new(FailingStore), AnalyticsParams::default(), 500);

        assert!(service.recent_ticks("btcusdt", 10).await.is_empty());
        assert_eq!(service.count("btcusdt").await, 0);
        assert_eq!(service.analytics("btcusdt").await, AnalyticsResult::empty("btcusdt"));
        assert_eq!(service.purge_older_than(Duration::from_secs(1)).await, 0);
        assert!(service.symbols().await.is_empty());

        let report = service
            .backfill(
                "btcusdt",
                vec![OhlcvRow {
                    time: Utc::now(),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1.0,
                }],
            )
            .await;
        assert_eq!(report, BackfillReport { inserted: 0, rejected: 1 });
    }

    #[tokio::test]
    async fn purge_keeps_fresh_ticks() {
        let (service, store) = service_with(&[("btcusdt", 1, 1.0)]);

        assert_eq!(service.purge_older_than(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.count("btcusdt").unwrap(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(service.purge_older_than(Duration::from_millis(1)).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retention_task_stops_on_cancel() {
        let (service, _) = service_with(&[]);
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stopper.cancel();
        });
        service
            .run_retention(cancel, Duration::from_secs(1), Duration::from_secs(60))
            .await;
    }
}
