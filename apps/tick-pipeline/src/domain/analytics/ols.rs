//! Dense ordinary least squares.
//!
//! Small-k regressions only: the normal equations are formed explicitly and
//! inverted with Gauss-Jordan elimination. Good enough for the handful of
//! regressors the ADF test needs.

/// Relative pivot size below which the normal matrix is treated as singular.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Regression failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OlsError {
    /// Not enough observations for the number of regressors.
    #[error("{nobs} observations cannot identify {params} parameters")]
    Underdetermined {
        /// Rows in the design matrix.
        nobs: usize,
        /// Columns in the design matrix.
        params: usize,
    },

    /// Design rows of unequal width, or a row/target count mismatch.
    #[error("design matrix shape mismatch")]
    Shape,

    /// `X'X` could not be inverted.
    #[error("singular design matrix")]
    Singular,

    /// A non-finite value appeared in the fit.
    #[error("non-finite regression output")]
    NonFinite,
}

/// Fitted regression.
#[derive(Debug, Clone)]
pub struct OlsFit {
    params: Vec<f64>,
    std_errors: Vec<f64>,
    ssr: f64,
    nobs: usize,
}

impl OlsFit {
    /// Number of observations used.
    #[must_use]
    pub const fn nobs(&self) -> usize {
        self.nobs
    }

    /// t-statistic for coefficient `index`, `None` if undefined.
    #[must_use]
    pub fn t_value(&self, index: usize) -> Option<f64> {
        let param = *self.params.get(index)?;
        let se = *self.std_errors.get(index)?;
        if se > 0.0 && se.is_finite() {
            let t = param / se;
            t.is_finite().then_some(t)
        } else {
            None
        }
    }

    /// Gaussian log-likelihood at the fitted parameters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn log_likelihood(&self) -> f64 {
        let n = self.nobs as f64;
        -0.5 * n * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0)
    }

    /// Akaike information criterion, counting every column as a parameter.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aic(&self) -> f64 {
        2.0f64.mul_add(self.params.len() as f64, -2.0 * self.log_likelihood())
    }
}

/// Regress `y` on the rows of `x`.
///
/// # Errors
///
/// Returns [`OlsError`] when the system is underdetermined, malformed,
/// singular, or produces non-finite output.
#[allow(clippy::cast_precision_loss)]
pub fn fit(y: &[f64], x: &[Vec<f64>]) -> Result<OlsFit, OlsError> {
    let nobs = y.len();
    let k = x.first().map_or(0, Vec::len);
    if x.len() != nobs || x.iter().any(|row| row.len() != k) {
        return Err(OlsError::Shape);
    }
    if k == 0 || nobs <= k {
        return Err(OlsError::Underdetermined { nobs, params: k });
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &target) in x.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * target;
            for j in i..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            xtx[i][j] = xtx[j][i];
        }
    }

    let inverse = invert(xtx)?;
    let params: Vec<f64> = inverse
        .iter()
        .map(|row| row.iter().zip(&xty).map(|(a, b)| a * b).sum())
        .collect();

    let ssr: f64 = x
        .iter()
        .zip(y)
        .map(|(row, &target)| {
            let fitted: f64 = row.iter().zip(&params).map(|(a, b)| a * b).sum();
            (target - fitted).powi(2)
        })
        .sum();

    let sigma2 = ssr / (nobs - k) as f64;
    let std_errors: Vec<f64> = (0..k).map(|i| (sigma2 * inverse[i][i]).sqrt()).collect();

    if !ssr.is_finite() || params.iter().any(|p| !p.is_finite()) {
        return Err(OlsError::NonFinite);
    }

    Ok(OlsFit {
        params,
        std_errors,
        ssr,
        nobs,
    })
}

/// Gauss-Jordan inversion of a symmetric positive semi-definite matrix.
///
/// A pivot is rejected when it falls below `PIVOT_TOLERANCE` times the
/// column's original diagonal, i.e. when the column is (numerically) a
/// linear combination of the columns before it.
fn invert(mut a: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, OlsError> {
    let n = a.len();
    let diagonal: Vec<f64> = (0..n).map(|i| a[i][i]).collect();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot = a[col][col];
        if diagonal[col] <= 0.0 || pivot.is_nan() || pivot <= PIVOT_TOLERANCE * diagonal[col] {
            return Err(OlsError::Singular);
        }

        for j in 0..n {
            a[col][j] /= pivot;
            inv[col][j] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }

    if inv.iter().flatten().any(|v| !v.is_finite()) {
        return Err(OlsError::NonFinite);
    }
    Ok(inv)
}
