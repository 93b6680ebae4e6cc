//! Analytics result types returned to API callers.

use serde::Serialize;

/// Window parameters for the indicator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsParams {
    /// Window for z-score, spread and the descriptive fields.
    pub window: usize,
    /// Minimum observations before the ADF test is attempted.
    pub adf_min_obs: usize,
    /// Window for Pearson correlation.
    pub correlation_window: usize,
    /// Window for the OLS hedge ratio.
    pub hedge_window: usize,
}

impl Default for AnalyticsParams {
    fn default() -> Self {
        Self {
            window: 20,
            adf_min_obs: 30,
            correlation_window: 50,
            hedge_window: 100,
        }
    }
}

/// Mean, dispersion and range of the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Descriptive {
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Highest price.
    pub high: f64,
    /// Lowest price.
    pub low: f64,
}

/// Single-symbol indicator snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsResult {
    /// Symbol analysed.
    pub symbol: String,
    /// Ticks the indicators were computed from.
    pub tick_count: usize,
    /// Z-score of the latest price against the window.
    pub zscore: Option<f64>,
    /// Relative high-low spread over the window.
    pub spread: Option<f64>,
    /// ADF p-value over all supplied ticks.
    pub adf_pvalue: Option<f64>,
    /// Window mean.
    pub mean: Option<f64>,
    /// Window population standard deviation.
    pub std: Option<f64>,
    /// Window high.
    pub high: Option<f64>,
    /// Window low.
    pub low: Option<f64>,
}

impl AnalyticsResult {
    /// Result with every indicator unavailable.
    #[must_use]
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tick_count: 0,
            zscore: None,
            spread: None,
            adf_pvalue: None,
            mean: None,
            std: None,
            high: None,
            low: None,
        }
    }
}

/// Pairwise relationship between two symbols.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    /// First symbol (regressor).
    pub symbol1: String,
    /// Second symbol (regressand).
    pub symbol2: String,
    /// Pearson correlation of the trailing windows.
    pub correlation: Option<f64>,
    /// OLS slope of `symbol2` on `symbol1`.
    pub hedge_ratio: Option<f64>,
}
