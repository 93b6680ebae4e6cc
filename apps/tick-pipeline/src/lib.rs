#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::items_after_statements
    )
)]

//! Tick Pipeline - Live Trade Ingestion and Analytics
//!
//! Streams trades for a set of symbols from the exchange, persists every
//! tick, fans the live feed out to subscribers and answers analytics
//! queries over the stored history.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure types and computations
//!   - `tick`: validated trade record
//!   - `candle`: OHLCV aggregation types
//!   - `analytics`: z-score, spread, ADF, correlation, hedge ratio
//!   - `streaming`: subscriber wire events
//!
//! - **Application**: use cases and port definitions
//!   - `ports`: feed transport, repository, publisher, subscriber sink
//!   - `services`: ingestion pipeline, market data queries
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `feed`: reconnecting WebSocket connections and their supervisor
//!   - `store`: SQLite tick store
//!   - `broadcast`: subscriber registry and keepalive
//!   - `backfill`: CSV import
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS (btcusdt) ──┐
//! Exchange WS (ethusdt) ──┼──► tick channel ──► Pipeline ──┬──► TickStore ──► MarketDataService
//! Exchange WS (...)     ──┘                                └──► Broadcaster ──► Subscriber 1..N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::analytics::{AnalyticsParams, AnalyticsResult, CorrelationResult};
pub use domain::candle::{Candle, OhlcvRow};
pub use domain::streaming::StreamEvent;
pub use domain::tick::{Tick, TickError};

// Ports and services
pub use application::ports::{
    DeliveryError, FeedConnector, FeedError, FeedFrame, FeedSession, SinkClosed, StoreError,
    SubscriberSink, TickPublisher, TickRepository, TickSink,
};
pub use application::services::{BackfillReport, MarketDataService, Pipeline};

// Feed
pub use infrastructure::feed::{
    BinanceConnector, ConnectionOutcome, ConnectionState, FeedConnection, FeedConnectionConfig,
    FeedEvent, FeedSupervisor, SupervisorConfig, SymbolStatus,
};

// Store and fan-out
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastReport, Broadcaster, SubscriberId, Subscription,
};
pub use infrastructure::store::TickStore;

// Infrastructure config
pub use infrastructure::config::{ConfigError, PipelineConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
