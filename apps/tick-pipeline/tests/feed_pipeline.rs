//! Feed-to-Subscriber Integration Tests
//!
//! Drives the supervisor with an in-process transport and checks that ticks
//! reach both the store and live subscribers, and that per-symbol failures
//! stay isolated.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tick_pipeline::infrastructure::feed::{HeartbeatConfig, ReconnectConfig};
use tick_pipeline::{
    BroadcastConfig, Broadcaster, ConnectionState, FeedConnector, FeedError, FeedFrame,
    FeedSession, FeedSupervisor, FeedConnectionConfig, MarketDataService, Pipeline,
    StreamEvent, SupervisorConfig, TickRepository, TickStore,
};

// =============================================================================
// In-process transport
// =============================================================================

/// Hands out one scripted session per symbol; later connects are refused.
#[derive(Default)]
struct ChannelConnector {
    sessions: Mutex<HashMap<String, mpsc::Receiver<FeedFrame>>>,
}

impl ChannelConnector {
    fn feed(&self, symbol: &str) -> mpsc::Sender<FeedFrame> {
        let (tx, rx) = mpsc::channel(64);
        self.sessions.lock().insert(symbol.to_string(), rx);
        tx
    }
}

struct ChannelSession {
    frames: mpsc::Receiver<FeedFrame>,
}

#[async_trait]
impl FeedConnector for ChannelConnector {
    async fn connect(&self, symbol: &str) -> Result<Box<dyn FeedSession>, FeedError> {
        match self.sessions.lock().remove(symbol) {
            Some(frames) => Ok(Box::new(ChannelSession { frames })),
            None => Err(FeedError::Connect(format!("no route to {symbol}"))),
        }
    }
}

#[async_trait]
impl FeedSession for ChannelSession {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, FeedError>> {
        self.frames.recv().await.map(Ok)
    }

    async fn ping(&mut self) -> Result<(), FeedError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

fn agg_trade(symbol: &str, price: f64, ts: i64) -> FeedFrame {
    FeedFrame::Text(format!(
        r#"{{"e":"aggTrade","E":{ts},"s":"{}","a":1,"p":"{price}","q":"0.5","T":{ts},"m":false}}"#,
        symbol.to_uppercase()
    ))
}

fn fast_retry_config() -> SupervisorConfig {
    SupervisorConfig {
        connection: FeedConnectionConfig {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_attempts: 5,
            },
            heartbeat: HeartbeatConfig::default(),
        },
        ..SupervisorConfig::default()
    }
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn ticks_reach_store_and_subscribers_in_order() {
    let connector = Arc::new(ChannelConnector::default());
    let btc = connector.feed("btcusdt");
    let eth = connector.feed("ethusdt");

    let store = Arc::new(TickStore::in_memory().unwrap());
    let broadcaster = Arc::new(Broadcaster::new(BroadcastConfig::default()));
    let mut subscription = broadcaster.subscribe();
    let pipeline = Pipeline::new(store.clone(), broadcaster.clone());

    let cancel = CancellationToken::new();
    let (supervisor, ticks, _events) = FeedSupervisor::start(
        connector,
        &symbols(&["BTCUSDT", "ethusdt"]),
        SupervisorConfig::default(),
        &cancel,
    );
    let ingest = tokio::spawn(async move { pipeline.run(ticks, CancellationToken::new()).await });

    for (i, price) in [100.0, 101.5, 99.25].into_iter().enumerate() {
        btc.send(agg_trade("btcusdt", price, 1_000 + i64::try_from(i).unwrap()))
            .await
            .unwrap();
    }
    eth.send(FeedFrame::Text("not json".into())).await.unwrap();
    eth.send(agg_trade("ethusdt", 2500.0, 2_000)).await.unwrap();

    let mut btc_prices = Vec::new();
    let mut eth_prices = Vec::new();
    while btc_prices.len() + eth_prices.len() < 4 {
        let event = timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        let StreamEvent::Tick(tick) = event else {
            continue;
        };
        match tick.symbol() {
            "btcusdt" => btc_prices.push(tick.price()),
            "ethusdt" => eth_prices.push(tick.price()),
            other => panic!("unexpected symbol {other}"),
        }
    }
    assert_eq!(btc_prices, vec![100.0, 101.5, 99.25]);
    assert_eq!(eth_prices, vec![2500.0]);

    supervisor.stop().await;
    assert_eq!(ingest.await.unwrap(), 4);

    let stored: Vec<f64> = store
        .recent("btcusdt", 10)
        .unwrap()
        .iter()
        .map(|t| t.price())
        .collect();
    assert_eq!(stored, vec![100.0, 101.5, 99.25]);
    assert_eq!(store.count("ethusdt").unwrap(), 1);

    let eth_status = supervisor
        .statuses()
        .into_iter()
        .find(|s| s.symbol == "ethusdt")
        .unwrap();
    assert_eq!(eth_status.malformed_messages, 1);
    assert_eq!(eth_status.ticks_received, 1);
}

#[tokio::test]
async fn abandoned_symbol_does_not_affect_others() {
    let connector = Arc::new(ChannelConnector::default());
    let btc = connector.feed("btcusdt");
    // No session is registered for "badusdt": every connect fails.

    let cancel = CancellationToken::new();
    let (supervisor, mut ticks, _events) = FeedSupervisor::start(
        connector,
        &symbols(&["btcusdt", "badusdt"]),
        fast_retry_config(),
        &cancel,
    );

    timeout(Duration::from_secs(5), async {
        while supervisor.degraded_symbols().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(supervisor.degraded_symbols(), vec!["badusdt"]);

    btc.send(agg_trade("btcusdt", 42.0, 1)).await.unwrap();
    let tick = timeout(Duration::from_secs(5), ticks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.symbol(), "btcusdt");
    assert_eq!(tick.price(), 42.0);

    let states: HashMap<String, ConnectionState> = supervisor
        .statuses()
        .into_iter()
        .map(|s| (s.symbol, s.state))
        .collect();
    assert_eq!(states["btcusdt"], ConnectionState::Streaming);
    assert_eq!(states["badusdt"], ConnectionState::Disconnected);

    supervisor.stop().await;
}

#[tokio::test]
async fn stop_is_prompt_while_in_backoff() {
    let connector = Arc::new(ChannelConnector::default());
    let cancel = CancellationToken::new();
    // Default policy: the first backoff sleep is 2s.
    let (supervisor, _ticks, _events) = FeedSupervisor::start(
        connector,
        &symbols(&["btcusdt"]),
        SupervisorConfig::default(),
        &cancel,
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.statuses()[0].state, ConnectionState::Backoff);

    let started = Instant::now();
    supervisor.stop().await;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(supervisor.is_finished());
    assert!(supervisor.degraded_symbols().is_empty());
}

#[tokio::test]
async fn stored_ticks_feed_analytics() {
    let connector = Arc::new(ChannelConnector::default());
    let btc = connector.feed("btcusdt");
    let store = Arc::new(TickStore::in_memory().unwrap());
    let pipeline = Pipeline::new(store.clone(), Arc::new(Broadcaster::default()));

    let cancel = CancellationToken::new();
    let (supervisor, ticks, _events) = FeedSupervisor::start(
        connector,
        &symbols(&["btcusdt"]),
        SupervisorConfig::default(),
        &cancel,
    );
    let ingest = tokio::spawn(async move { pipeline.run(ticks, CancellationToken::new()).await });

    for i in 0..40_i32 {
        let price = 100.0 + f64::from(i % 5);
        btc.send(agg_trade("btcusdt", price, i64::from(i))).await.unwrap();
    }

    timeout(Duration::from_secs(5), async {
        while store.count("btcusdt").unwrap() < 40 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let service = MarketDataService::new(store.clone(), Default::default(), 500);
    let result = service.analytics("btcusdt").await;
    assert_eq!(result.tick_count, 40);
    assert!(result.zscore.is_some());
    assert!(result.spread.is_some());
    assert_eq!(result.high, Some(104.0));
    assert_eq!(result.low, Some(100.0));

    supervisor.stop().await;
    assert_eq!(ingest.await.unwrap(), 40);
}
