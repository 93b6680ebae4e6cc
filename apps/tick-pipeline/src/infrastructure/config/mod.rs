//! Configuration Module
//!
//! Environment-driven configuration for the pipeline service.

mod settings;

pub use settings::{
    AnalyticsSettings, BackfillSettings, BroadcastSettings, ConfigError, FeedSettings,
    PipelineConfig, ServerSettings, StoreSettings,
};
