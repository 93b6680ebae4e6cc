//! Augmented Dickey-Fuller unit-root test.
//!
//! Constant-only regression, lag order picked by AIC, p-value from
//! MacKinnon's (1994) response-surface approximation:
//!
//! ```text
//! Δx_t = α + γ·x_{t-1} + Σ_{i=1..p} β_i·Δx_{t-i} + ε_t
//! ```
//!
//! The test statistic is the t-value of `γ`. A small p-value rejects the
//! unit root, i.e. the series looks mean-reverting.

use super::ols;

/// MacKinnon bounds and polynomial coefficients, constant-only case, one series.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038_269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.932_02, -0.127_45, -0.010_368];

/// Outcome of a completed test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfOutcome {
    /// t-value of the lagged level coefficient.
    pub statistic: f64,
    /// Approximate p-value.
    pub p_value: f64,
    /// Number of lagged differences used in the final regression.
    pub used_lag: usize,
    /// Observations in the final regression.
    pub nobs: usize,
}

/// Schwert's rule of thumb, capped so the widest regression stays identified.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn max_lag(nobs: usize) -> Option<usize> {
    let schwert = (12.0 * (nobs as f64 / 100.0).powf(0.25)).ceil() as usize;
    let cap = (nobs / 2).checked_sub(2)?;
    Some(schwert.min(cap))
}

/// Run the test on a level series.
///
/// Returns `None` when the series is too short or any regression is
/// degenerate (e.g. a constant series).
#[must_use]
pub fn test(series: &[f64]) -> Option<AdfOutcome> {
    let maxlag = max_lag(series.len())?;
    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    if diffs.len() <= maxlag {
        return None;
    }

    // Every candidate lag is fitted on the sample the widest model can use,
    // otherwise their AICs are not comparable.
    let mut best: Option<(f64, usize)> = None;
    for lags in 0..=maxlag {
        let (y, x) = design(series, &diffs, lags, maxlag);
        let Ok(fit) = ols::fit(&y, &x) else {
            continue;
        };
        let aic = fit.aic();
        if !aic.is_finite() {
            continue;
        }
        if best.is_none_or(|(best_aic, _)| aic < best_aic) {
            best = Some((aic, lags));
        }
    }
    let (_, used_lag) = best?;

    let (y, x) = design(series, &diffs, used_lag, used_lag);
    let fit = ols::fit(&y, &x).ok()?;
    let statistic = fit.t_value(1)?;

    Some(AdfOutcome {
        statistic,
        p_value: mackinnon_p_value(statistic),
        used_lag,
        nobs: fit.nobs(),
    })
}

/// Build `(Δx_t, [1, x_t, Δx_{t-1}, …, Δx_{t-lags}])` for `t` in `start..`.
fn design(levels: &[f64], diffs: &[f64], lags: usize, start: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let rows = diffs.len() - start;
    let mut y = Vec::with_capacity(rows);
    let mut x = Vec::with_capacity(rows);

    for t in start..diffs.len() {
        y.push(diffs[t]);
        let mut row = Vec::with_capacity(lags + 2);
        row.push(1.0);
        row.push(levels[t]);
        row.extend((1..=lags).map(|i| diffs[t - i]));
        x.push(row);
    }

    (y, x)
}

/// Approximate p-value for an ADF statistic.
#[must_use]
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }

    let z = if statistic <= TAU_STAR {
        polyval(&TAU_SMALL_P, statistic)
    } else {
        polyval(&TAU_LARGE_P, statistic)
    };
    norm_cdf(z)
}

/// `c[0] + c[1]·x + c[2]·x² + …`
fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, &c| acc.mul_add(x, c))
}

/// Standard normal CDF.
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}
