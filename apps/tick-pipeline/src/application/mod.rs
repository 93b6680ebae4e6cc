//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the pipeline needs from the outside world (a feed
//! transport, a tick repository, a fan-out publisher). Services compose them
//! into ingestion and query use cases.

/// Port interfaces for external systems.
pub mod ports;

/// Ingestion and market data query services.
pub mod services;
