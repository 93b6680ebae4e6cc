//! Domain Layer - Core market data types and pure computations.
//!
//! This layer has no I/O. Everything here operates on owned values or
//! slices and can be exercised without a runtime.

/// Trade tick record.
pub mod tick;

/// OHLCV candle derived from ticks.
pub mod candle;

/// Rolling statistical indicators over tick slices.
pub mod analytics;

/// Events pushed to live subscribers.
pub mod streaming;
