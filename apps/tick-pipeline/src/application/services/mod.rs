//! Application Services
//!
//! - [`Pipeline`]: the ingestion hot path (persist + fan-out per tick)
//! - [`MarketDataService`]: read-side queries and analytics over the store

mod market_data;
mod pipeline;

pub use market_data::{BackfillReport, MarketDataService};
pub use pipeline::{IngestOutcome, Pipeline, PipelineStats};
