//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for liveness, readiness, per-symbol feed status and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness check (simple OK)
//! - `GET /readyz` - readiness check (at least one feed streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::Broadcaster;
use crate::infrastructure::feed::{ConnectionState, FeedSupervisor, SymbolStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-symbol feed status.
    pub feeds: Vec<FeedInfo>,
    /// Symbols abandoned after exhausting retries.
    pub degraded_symbols: Vec<String>,
    /// Live subscriber count.
    pub subscribers: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every feed streaming.
    Healthy,
    /// Some feeds streaming.
    Degraded,
    /// No feed streaming.
    Unhealthy,
}

/// One symbol's feed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedInfo {
    /// Symbol.
    pub symbol: String,
    /// Connection state.
    pub state: &'static str,
    /// Whether the feed is streaming.
    pub connected: bool,
    /// Ticks received.
    pub ticks_received: u64,
    /// Malformed messages dropped.
    pub malformed_messages: u64,
    /// Current reconnect attempts (0 while streaming).
    pub reconnect_attempts: u32,
    /// Retries exhausted.
    pub abandoned: bool,
}

impl From<&SymbolStatus> for FeedInfo {
    fn from(status: &SymbolStatus) -> Self {
        Self {
            symbol: status.symbol.clone(),
            state: status.state.as_str(),
            connected: status.state == ConnectionState::Streaming,
            ticks_received: status.ticks_received,
            malformed_messages: status.malformed_messages,
            reconnect_attempts: status.reconnect_attempts,
            abandoned: status.abandoned,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    supervisor: Arc<FeedSupervisor>,
    broadcaster: Arc<Broadcaster>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        supervisor: Arc<FeedSupervisor>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            supervisor,
            broadcaster,
        }
    }

    /// Current health snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HealthResponse {
        build_health_response(
            &self.version,
            self.started_at.elapsed().as_secs(),
            &self.supervisor.statuses(),
            self.broadcaster.subscriber_count(),
        )
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = state.snapshot();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if is_ready(&state.snapshot().feeds) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(
    version: &str,
    uptime_secs: u64,
    statuses: &[SymbolStatus],
    subscribers: usize,
) -> HealthResponse {
    let feeds: Vec<FeedInfo> = statuses.iter().map(FeedInfo::from).collect();
    let degraded_symbols = feeds
        .iter()
        .filter(|f| f.abandoned)
        .map(|f| f.symbol.clone())
        .collect();

    HealthResponse {
        status: determine_health_status(&feeds),
        version: version.to_string(),
        uptime_secs,
        current_time: Utc::now(),
        feeds,
        degraded_symbols,
        subscribers,
    }
}

fn determine_health_status(feeds: &[FeedInfo]) -> HealthStatus {
    let connected = feeds.iter().filter(|f| f.connected).count();

    if connected == 0 {
        HealthStatus::Unhealthy
    } else if connected == feeds.len() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

fn is_ready(feeds: &[FeedInfo]) -> bool {
    feeds.iter().any(|f| f.connected)
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
