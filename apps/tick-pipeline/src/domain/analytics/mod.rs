//! Tick Analytics
//!
//! Pure functions over ordered tick slices. Nothing here touches storage or
//! holds state, so callers can run them on any snapshot they like.
//!
//! All dispersion figures are population statistics (divide by `n`). A
//! standard deviation or midpoint below [`DEGENERATE_EPSILON`] is treated as
//! zero; indicators that cannot be computed come back as `None`.

pub mod adf;
pub mod ols;
mod results;

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};

pub use results::{AnalyticsParams, AnalyticsResult, CorrelationResult, Descriptive};

use crate::domain::candle::Candle;
use crate::domain::tick::{Tick, prices};

/// Values with magnitude below this are considered zero.
pub const DEGENERATE_EPSILON: f64 = 1e-8;

// =============================================================================
// Candles
// =============================================================================

/// Aggregate ticks into fixed-width, epoch-aligned OHLCV candles.
///
/// Buckets come back in ascending time order; empty buckets are skipped.
/// Within a bucket the first tick in slice order opens and the last closes.
/// A zero window yields no candles.
#[must_use]
pub fn to_candles(ticks: &[Tick], window_seconds: u64) -> Vec<Candle> {
    let Ok(window_ms) = i64::try_from(window_seconds.saturating_mul(1000)) else {
        return Vec::new();
    };
    if window_ms == 0 {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for tick in ticks {
        let bin = tick.timestamp_ms().div_euclid(window_ms);
        buckets
            .entry(bin)
            .and_modify(|candle| candle.update(tick.price(), tick.size()))
            .or_insert_with(|| {
                let start = Utc
                    .timestamp_millis_opt(bin * window_ms)
                    .single()
                    .unwrap_or_else(|| tick.timestamp());
                Candle::open_at(tick.symbol(), start, tick.price(), tick.size())
            });
    }

    buckets.into_values().collect()
}

// =============================================================================
// Single-series indicators
// =============================================================================

/// Z-score of the latest price relative to the trailing `window` prices.
///
/// `None` with fewer than `window` ticks; `0.0` when the window is flat.
#[must_use]
pub fn z_score(ticks: &[Tick], window: usize) -> Option<f64> {
    let recent = trailing(ticks, window)?;
    let prices = prices(recent);
    let (mean, std) = mean_std(&prices)?;
    let latest = *prices.last()?;

    if std < DEGENERATE_EPSILON {
        Some(0.0)
    } else {
        Some((latest - mean) / std)
    }
}

/// High-low range over the trailing window, relative to its midpoint.
///
/// `None` with fewer than `window` ticks; `0.0` when the midpoint is ~zero.
#[must_use]
pub fn spread(ticks: &[Tick], window: usize) -> Option<f64> {
    let recent = trailing(ticks, window)?;
    let (high, low) = high_low(&prices(recent))?;
    let mid = f64::midpoint(high, low);

    if mid < DEGENERATE_EPSILON {
        Some(0.0)
    } else {
        Some((high - low) / mid)
    }
}

/// ADF p-value over every supplied tick.
///
/// `None` with fewer than `min_obs` ticks or on any numeric failure.
#[must_use]
pub fn stationarity_p_value(ticks: &[Tick], min_obs: usize) -> Option<f64> {
    if ticks.len() < min_obs {
        return None;
    }
    adf::test(&prices(ticks)).map(|outcome| outcome.p_value)
}

/// Mean, standard deviation and range of the trailing window.
#[must_use]
pub fn describe(ticks: &[Tick], window: usize) -> Option<Descriptive> {
    let prices = prices(trailing(ticks, window)?);
    let (mean, std) = mean_std(&prices)?;
    let (high, low) = high_low(&prices)?;
    Some(Descriptive {
        mean,
        std,
        high,
        low,
    })
}

// =============================================================================
// Pairwise indicators
// =============================================================================

/// Pearson correlation of the trailing `window` prices of each series.
///
/// The windows are aligned by position, not by timestamp. `None` if either
/// series is shorter than `window` or flat.
#[must_use]
pub fn correlation(a: &[Tick], b: &[Tick], window: usize) -> Option<f64> {
    let xs = prices(trailing(a, window)?);
    let ys = prices(trailing(b, window)?);
    let (mean_x, std_x) = mean_std(&xs)?;
    let (mean_y, std_y) = mean_std(&ys)?;

    if std_x < DEGENERATE_EPSILON || std_y < DEGENERATE_EPSILON {
        return None;
    }

    let r = covariance(&xs, mean_x, &ys, mean_y) / (std_x * std_y);
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// OLS slope of `b` regressed on `a` over the trailing `window` prices.
///
/// Same positional alignment as [`correlation`]. `None` if either series is
/// shorter than `window`, `a` is flat, or the slope is not finite.
#[must_use]
pub fn hedge_ratio(a: &[Tick], b: &[Tick], window: usize) -> Option<f64> {
    let xs = prices(trailing(a, window)?);
    let ys = prices(trailing(b, window)?);
    let (mean_x, std_x) = mean_std(&xs)?;
    let (mean_y, _) = mean_std(&ys)?;

    if std_x < DEGENERATE_EPSILON {
        return None;
    }

    let slope = covariance(&xs, mean_x, &ys, mean_y) / (std_x * std_x);
    slope.is_finite().then_some(slope)
}

// =============================================================================
// Aggregates
// =============================================================================

/// Compute the full single-symbol indicator set.
#[must_use]
pub fn analyze(symbol: &str, ticks: &[Tick], params: &AnalyticsParams) -> AnalyticsResult {
    let descriptive = describe(ticks, params.window);

    AnalyticsResult {
        symbol: symbol.to_string(),
        tick_count: ticks.len(),
        zscore: z_score(ticks, params.window),
        spread: spread(ticks, params.window),
        adf_pvalue: stationarity_p_value(ticks, params.adf_min_obs),
        mean: descriptive.map(|d| d.mean),
        std: descriptive.map(|d| d.std),
        high: descriptive.map(|d| d.high),
        low: descriptive.map(|d| d.low),
    }
}

/// Compute correlation and hedge ratio for a symbol pair.
#[must_use]
pub fn correlate(
    symbol1: &str,
    a: &[Tick],
    symbol2: &str,
    b: &[Tick],
    params: &AnalyticsParams,
) -> CorrelationResult {
    CorrelationResult {
        symbol1: symbol1.to_string(),
        symbol2: symbol2.to_string(),
        correlation: correlation(a, b, params.correlation_window),
        hedge_ratio: hedge_ratio(a, b, params.hedge_window),
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Last `window` ticks, or `None` if there aren't that many (or `window` is 0).
fn trailing(ticks: &[Tick], window: usize) -> Option<&[Tick]> {
    if window == 0 || ticks.len() < window {
        return None;
    }
    Some(&ticks[ticks.len() - window..])
}

#[allow(clippy::cast_precision_loss)]
fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

#[allow(clippy::cast_precision_loss)]
fn covariance(xs: &[f64], mean_x: f64, ys: &[f64], mean_y: f64) -> f64 {
    let n = xs.len().min(ys.len()) as f64;
    xs.iter()
        .zip(ys)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum::<f64>()
        / n
}

fn high_low(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(hi, lo), &v| (hi.max(v), lo.min(v))),
    )
}
