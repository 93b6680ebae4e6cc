//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus the operational surface of the service.

/// Exchange WebSocket feed (connections, supervisor, codec).
pub mod feed;

/// SQLite tick store.
pub mod store;

/// Subscriber fan-out.
pub mod broadcast;

/// CSV backfill reader.
pub mod backfill;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
