//! Binned deviation of paired values from the identity line.
//!
//! Paired values `(x[i], y[i])` are grouped into equal-width bins over the joint range
//! of both sequences. Each non-empty bin contributes the gap between its mean x and
//! its mean y, so the metric picks up systematic departures from `y = x` while
//! smoothing out per-point scatter.

use crate::error::{Result, SimFitError};

/// Default number of bins used when scoring grid candidates.
pub const DEFAULT_NBINS: usize = 20;

/// Mean `|mean_x - mean_y|` over bins defined on `x`.
///
/// The joint range `[min(x ∪ y), max(x ∪ y)]` is split into `nbins` equal-width bins.
/// A point belongs to every bin whose closed interval contains `x[i]`, so a point on
/// an inner edge counts for both neighbours. Empty bins are skipped rather than
/// counted as zero.
pub fn directed_diag_distance(x: &[f64], y: &[f64], nbins: usize) -> Result<f64> {
    validate_pairs(x, y, nbins)?;

    let (lo, hi) = x
        .iter()
        .chain(y.iter())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let width = (hi - lo) / nbins as f64;

    let mut total = 0.0;
    let mut filled = 0usize;
    for bin in 0..nbins {
        let lower = lo + bin as f64 * width;
        let upper = if bin + 1 == nbins {
            hi
        } else {
            lo + (bin + 1) as f64 * width
        };

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut count = 0usize;
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            if xi >= lower && xi <= upper {
                sum_x += xi;
                sum_y += yi;
                count += 1;
            }
        }

        if count > 0 {
            total += ((sum_x - sum_y) / count as f64).abs();
            filled += 1;
        }
    }

    // Every x lies in [lo, hi], so at least one bin is filled.
    Ok(total / filled.max(1) as f64)
}

/// Symmetric diagonal distance: the average of binning on `x` and binning on `y`.
///
/// `diag_distance(x, x, n)` is zero and `diag_distance(x, y, n) == diag_distance(y, x, n)`.
/// Grid scores use this form, so they differ from scores computed with
/// [`directed_diag_distance`] alone whenever the two binnings disagree.
pub fn diag_distance(x: &[f64], y: &[f64], nbins: usize) -> Result<f64> {
    let forward = directed_diag_distance(x, y, nbins)?;
    let backward = directed_diag_distance(y, x, nbins)?;
    Ok(0.5 * (forward + backward))
}

fn validate_pairs(x: &[f64], y: &[f64], nbins: usize) -> Result<()> {
    if nbins == 0 {
        return Err(SimFitError::InvalidParameter(
            "number of bins must be at least 1".to_string(),
        ));
    }
    if x.len() != y.len() {
        return Err(SimFitError::ShapeMismatch {
            context: "paired sequences for diagonal distance".to_string(),
            expected: x.len(),
            actual: y.len(),
        });
    }
    if x.is_empty() {
        return Err(SimFitError::EmptyInput(
            "diagonal distance needs at least one pair".to_string(),
        ));
    }
    if let Some(i) = x.iter().chain(y.iter()).position(|v| !v.is_finite()) {
        return Err(SimFitError::InvalidParameter(format!(
            "non-finite value at position {} of the paired sequences",
            i
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i as f64 * 0.37).sin() * 3.0 + i as f64 * 0.1).collect()
    }

    #[test]
    fn test_identical_sequences_have_zero_distance() {
        let x = ramp(101);
        for nbins in [1, 2, 7, 20, 500] {
            assert_eq!(diag_distance(&x, &x, nbins).unwrap(), 0.0);
            assert_eq!(directed_diag_distance(&x, &x, nbins).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_constant_shift() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v + 2.0).collect();
        assert_abs_diff_eq!(directed_diag_distance(&x, &y, 10).unwrap(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(diag_distance(&x, &y, 10).unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_directed_bins_on_first_sequence() {
        // Edges 0, 1, 2: first bin holds x = 0 and x = 1, second holds x = 1 and x = 2
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, 0.0, 2.0];
        assert_abs_diff_eq!(directed_diag_distance(&x, &y, 2).unwrap(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(directed_diag_distance(&y, &x, 2).unwrap(), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(diag_distance(&x, &y, 2).unwrap(), 0.375, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetry() {
        let x = ramp(60);
        let y: Vec<f64> = x.iter().enumerate().map(|(i, v)| v * 1.1 + (i % 3) as f64).collect();
        for nbins in [1, 5, 20] {
            let xy = diag_distance(&x, &y, nbins).unwrap();
            let yx = diag_distance(&y, &x, nbins).unwrap();
            assert_abs_diff_eq!(xy, yx, epsilon = 1e-12);
            assert!(xy >= 0.0);
        }
    }

    #[test]
    fn test_empty_bins_are_omitted() {
        // All x sit at the extremes, so the inner bins are empty
        let x = [0.0, 0.0, 10.0, 10.0];
        let y = [1.0, 1.0, 10.0, 10.0];
        // Bin [0, 1] -> |0 - 1| = 1, bin [9, 10] -> 0, remaining 8 bins empty
        assert_abs_diff_eq!(directed_diag_distance(&x, &y, 10).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_range() {
        let x = [3.0, 3.0, 3.0];
        assert_eq!(diag_distance(&x, &x, 20).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            diag_distance(&[1.0, 2.0], &[1.0], 5),
            Err(SimFitError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            diag_distance(&[1.0], &[1.0], 0),
            Err(SimFitError::InvalidParameter(_))
        ));
        assert!(matches!(
            diag_distance(&[], &[], 5),
            Err(SimFitError::EmptyInput(_))
        ));
        assert!(diag_distance(&[1.0, f64::NAN], &[1.0, 2.0], 5).is_err());
    }
}
