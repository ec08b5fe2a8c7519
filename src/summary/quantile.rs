//! Empirical quantiles with linear interpolation between order statistics.
//!
//! The interpolation rule is the "type 7" definition: for `n` sorted values and a
//! probability `p`, the position `h = (n - 1) * p` is split into an integer part `j`
//! and a fraction `g`, and the quantile is `x[j] + g * (x[j + 1] - x[j])`. Reference
//! grids are built with this rule, so profiles computed any other way are not
//! comparable with them.

use crate::error::{Result, SimFitError};
use std::cmp::Ordering;

/// Type 7 quantile of an already sorted, NaN-free slice.
///
/// `sorted` must be non-empty and `p` must lie in `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let h = (n - 1) as f64 * p;
    let j = h.floor() as usize;
    if j >= n - 1 {
        return sorted[n - 1];
    }
    let g = h - j as f64;
    let lower = sorted[j];
    let upper = sorted[j + 1];
    if g == 0.0 || lower == upper {
        lower
    } else {
        lower + g * (upper - lower)
    }
}

/// Sample the empirical quantile function of `values` at every probability in `levels`.
///
/// NaN values are ignored. Fails with [`SimFitError::EmptyInput`] when no value is left.
pub fn quantiles(values: &[f64], levels: &[f64]) -> Result<Vec<f64>> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return Err(SimFitError::EmptyInput(format!(
            "no non-missing value among {} for quantile computation",
            values.len()
        )));
    }

    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    Ok(levels
        .iter()
        .map(|&p| quantile_sorted(&sorted, p))
        .collect())
}
