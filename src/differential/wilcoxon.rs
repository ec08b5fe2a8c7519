//! Wilcoxon rank-sum (Mann-Whitney U) test between two groups of cells.

use ndarray::Array2;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use std::cmp::Ordering;

/// Outcome of one rank-sum test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankSumResult {
    /// W = rank sum of the first group minus `n1 (n1 + 1) / 2`
    pub statistic: f64,
    /// Continuity-corrected normal deviate
    pub z: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

/// Two-sided rank-sum test of `x` against `y` using the normal approximation.
///
/// Ties get average ranks and the variance is tie-corrected. A continuity correction
/// of 0.5 is applied. Returns NaN statistics when either group is empty; when all values
/// are tied the groups are indistinguishable and the p-value is 1.
pub fn rank_sum_test(x: &[f64], y: &[f64]) -> RankSumResult {
    let nx = x.len();
    let ny = y.len();
    if nx == 0 || ny == 0 {
        return RankSumResult {
            statistic: f64::NAN,
            z: f64::NAN,
            p_value: f64::NAN,
        };
    }

    let mut combined: Vec<(f64, bool)> = Vec::with_capacity(nx + ny);
    combined.extend(x.iter().map(|&v| (v, true)));
    combined.extend(y.iter().map(|&v| (v, false)));
    combined.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let n = combined.len();
    let mut rank_sum_x = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && combined[j].0 == combined[i].0 {
            j += 1;
        }
        // positions i..j share the average of ranks i + 1 ..= j
        let rank = (i + j + 1) as f64 / 2.0;
        let in_x = combined[i..j].iter().filter(|(_, from_x)| *from_x).count();
        rank_sum_x += rank * in_x as f64;

        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }

    let nx_f = nx as f64;
    let ny_f = ny as f64;
    let n_f = n as f64;
    let statistic = rank_sum_x - nx_f * (nx_f + 1.0) / 2.0;
    let mean_w = nx_f * ny_f / 2.0;
    let var_w = nx_f * ny_f / 12.0 * ((n_f + 1.0) - tie_term / (n_f * (n_f - 1.0)));

    if var_w <= 0.0 {
        return RankSumResult {
            statistic,
            z: 0.0,
            p_value: 1.0,
        };
    }

    let diff = statistic - mean_w;
    let correction = if diff == 0.0 { 0.0 } else { 0.5 * diff.signum() };
    let z = (diff - correction) / var_w.sqrt();

    let p_value = match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * normal.cdf(-z.abs())).min(1.0),
        Err(_) => f64::NAN,
    };

    RankSumResult {
        statistic,
        z,
        p_value,
    }
}

/// Rank-sum test per gene (row) of `counts`, comparing two sets of cell columns.
///
/// Missing (NaN) entries are dropped before ranking.
pub fn rank_sum_rows(
    counts: &Array2<f64>,
    group1_indices: &[usize],
    group2_indices: &[usize],
) -> anyhow::Result<Vec<RankSumResult>> {
    if group1_indices.is_empty() || group2_indices.is_empty() {
        return Err(anyhow::anyhow!("Group indices cannot be empty"));
    }
    let n_cells = counts.ncols();
    if let Some(&bad) = group1_indices
        .iter()
        .chain(group2_indices.iter())
        .find(|&&c| c >= n_cells)
    {
        return Err(anyhow::anyhow!(
            "Cell index {} out of range for {} cells",
            bad,
            n_cells
        ));
    }

    let results: Vec<RankSumResult> = (0..counts.nrows())
        .into_par_iter()
        .map(|gene| {
            let row = counts.row(gene);
            let group1: Vec<f64> = group1_indices
                .iter()
                .map(|&c| row[c])
                .filter(|v| !v.is_nan())
                .collect();
            let group2: Vec<f64> = group2_indices
                .iter()
                .map(|&c| row[c])
                .filter(|v| !v.is_nan())
                .collect();
            rank_sum_test(&group1, &group2)
        })
        .collect();

    Ok(results)
}
