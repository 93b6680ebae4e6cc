//! Pipeline Configuration Settings
//!
//! Configuration types for the pipeline, loaded from environment variables.
//! Unset or unparsable variables fall back to defaults; only values that
//! would leave the pipeline unable to run are rejected.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::analytics::AnalyticsParams;
use crate::domain::tick::normalize_symbol;

/// Exchange feed settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Symbols to stream, normalized.
    pub symbols: Vec<String>,
    /// WebSocket base URL.
    pub base_url: String,
    /// Per-symbol channel name (`aggTrade` or `trade`).
    pub stream: String,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// How long a ping may go unanswered.
    pub heartbeat_timeout: Duration,
    /// First reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Backoff multiplier.
    pub reconnect_delay_multiplier: f64,
    /// Backoff jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// Consecutive failures before a symbol is abandoned (0 = never).
    pub max_reconnect_attempts: u32,
    /// Capacity of the merged tick channel.
    pub channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["btcusdt".into(), "ethusdt".into(), "bnbusdt".into()],
            base_url: "wss://fstream.binance.com/ws".into(),
            stream: "aggTrade".into(),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_secs(2),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 5,
            channel_capacity: 4096,
        }
    }
}

/// Tick store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Age after which ticks are purged (`None` keeps everything).
    pub retention: Option<Duration>,
    /// How often the purge runs.
    pub retention_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ticks.db"),
            retention: Some(Duration::from_secs(86_400)),
            retention_interval: Duration::from_secs(3600),
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Idle time before a subscriber is pinged.
    pub idle_window: Duration,
    /// Bound on one delivery.
    pub send_timeout: Duration,
    /// Keepalive scan period.
    pub keepalive_interval: Duration,
    /// Events buffered per channel subscriber.
    pub subscriber_buffer: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_secs(30),
            send_timeout: Duration::from_millis(1000),
            keepalive_interval: Duration::from_secs(5),
            subscriber_buffer: 1024,
        }
    }
}

/// Analytics windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsSettings {
    /// Ticks loaded per analytics/correlation request.
    pub history_limit: usize,
    /// Z-score, spread and descriptive window.
    pub window: usize,
    /// Minimum observations for the ADF test.
    pub adf_min_obs: usize,
    /// Correlation window.
    pub correlation_window: usize,
    /// Hedge-ratio window.
    pub hedge_window: usize,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        let params = AnalyticsParams::default();
        Self {
            history_limit: 500,
            window: params.window,
            adf_min_obs: params.adf_min_obs,
            correlation_window: params.correlation_window,
            hedge_window: params.hedge_window,
        }
    }
}

impl AnalyticsSettings {
    /// Indicator windows as domain parameters.
    #[must_use]
    pub const fn params(&self) -> AnalyticsParams {
        AnalyticsParams {
            window: self.window,
            adf_min_obs: self.adf_min_obs,
            correlation_window: self.correlation_window,
            hedge_window: self.hedge_window,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health, readiness and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8000 }
    }
}

/// One-shot CSV import at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSettings {
    /// OHLCV CSV file.
    pub csv_path: PathBuf,
    /// Symbol the rows belong to.
    pub symbol: String,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineConfig {
    /// Exchange feed.
    pub feed: FeedSettings,
    /// Tick store.
    pub store: StoreSettings,
    /// Subscriber fan-out.
    pub broadcast: BroadcastSettings,
    /// Analytics windows.
    pub analytics: AnalyticsSettings,
    /// HTTP ports.
    pub server: ServerSettings,
    /// Optional startup backfill.
    pub backfill: Option<BackfillSettings>,
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a setting would leave the pipeline unable to run.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a setting would leave the pipeline unable to run.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let feed_defaults = FeedSettings::default();
        let symbols = match env.get("FEED_SYMBOLS") {
            Some(list) => parse_symbols(&list),
            None => feed_defaults.symbols.clone(),
        };
        if symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }

        let feed = FeedSettings {
            symbols,
            base_url: env.get("FEED_WS_BASE_URL").unwrap_or(feed_defaults.base_url),
            stream: env.get("FEED_STREAM").unwrap_or(feed_defaults.stream),
            heartbeat_interval: env.secs(
                "FEED_HEARTBEAT_INTERVAL_SECS",
                feed_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "FEED_HEARTBEAT_TIMEOUT_SECS",
                feed_defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: env.secs(
                "FEED_RECONNECT_DELAY_INITIAL_SECS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse("FEED_RECONNECT_JITTER", feed_defaults.reconnect_jitter),
            max_reconnect_attempts: env.parse(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
            channel_capacity: env.nonzero("FEED_CHANNEL_CAPACITY", feed_defaults.channel_capacity)?,
        };

        let store_defaults = StoreSettings::default();
        let retention_days: u64 = env.parse("TICK_RETENTION_DAYS", 1);
        let store = StoreSettings {
            db_path: env
                .get("TICK_DB_PATH")
                .map_or(store_defaults.db_path, PathBuf::from),
            retention: (retention_days > 0)
                .then(|| Duration::from_secs(retention_days.saturating_mul(86_400))),
            retention_interval: env.secs(
                "TICK_RETENTION_INTERVAL_SECS",
                store_defaults.retention_interval,
            ),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            idle_window: env.secs("BROADCAST_IDLE_WINDOW_SECS", broadcast_defaults.idle_window),
            send_timeout: env.millis("BROADCAST_SEND_TIMEOUT_MS", broadcast_defaults.send_timeout),
            keepalive_interval: env.secs(
                "BROADCAST_KEEPALIVE_INTERVAL_SECS",
                broadcast_defaults.keepalive_interval,
            ),
            subscriber_buffer: env.nonzero(
                "BROADCAST_SUBSCRIBER_BUFFER",
                broadcast_defaults.subscriber_buffer,
            )?,
        };

        let analytics_defaults = AnalyticsSettings::default();
        let analytics = AnalyticsSettings {
            history_limit: env
                .nonzero("ANALYTICS_HISTORY_LIMIT", analytics_defaults.history_limit)?,
            window: env.nonzero("ANALYTICS_WINDOW", analytics_defaults.window)?,
            adf_min_obs: env.parse("ANALYTICS_ADF_MIN_OBS", analytics_defaults.adf_min_obs),
            correlation_window: env.nonzero(
                "ANALYTICS_CORRELATION_WINDOW",
                analytics_defaults.correlation_window,
            )?,
            hedge_window: env.nonzero("ANALYTICS_HEDGE_WINDOW", analytics_defaults.hedge_window)?,
        };

        let server = ServerSettings {
            health_port: env.parse("PIPELINE_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let backfill = match (env.get("BACKFILL_CSV"), env.get("BACKFILL_SYMBOL")) {
            (Some(path), Some(symbol)) if !normalize_symbol(&symbol).is_empty() => {
                Some(BackfillSettings {
                    csv_path: PathBuf::from(path),
                    symbol: normalize_symbol(&symbol),
                })
            }
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteBackfill),
        };

        Ok(Self {
            feed,
            store,
            broadcast,
            analytics,
            server,
            backfill,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The symbol list is empty after normalization.
    #[error("FEED_SYMBOLS must name at least one symbol")]
    NoSymbols,
    /// A capacity or window was set to zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
    /// Only one of `BACKFILL_CSV` / `BACKFILL_SYMBOL` was set.
    #[error("BACKFILL_CSV and BACKFILL_SYMBOL must be set together")]
    IncompleteBackfill,
}

fn parse_symbols(list: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in list.split(',').map(normalize_symbol) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

/// Variable lookup with the defaulting rules used above.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn nonzero(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::ZeroValue(key.to_string())),
            value => Ok(value),
        }
    }
}
