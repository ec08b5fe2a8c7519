//! Quantile-quantile comparison of two expression matrices.

use super::{ProfileKind, QuantileLevels, SummaryStats};
use crate::error::Result;
use serde::Serialize;
use single_utilities::traits::FloatOpsTS;

/// Quantiles of one statistic in two datasets, paired level by level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QqPair {
    pub kind: ProfileKind,
    pub levels: Vec<f64>,
    pub first: Vec<f64>,
    pub second: Vec<f64>,
}

impl QqPair {
    /// Largest absolute gap between the paired quantiles.
    pub fn max_abs_gap(&self) -> f64 {
        self.first
            .iter()
            .zip(self.second.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// Pair the quantile profiles of `first` and `second` for every [`ProfileKind`].
///
/// Typically `first` is observed data and `second` a simulation of it; points on the
/// identity line mean the two datasets agree on that statistic.
pub fn qq_profiles<A, B, T, U>(first: &A, second: &B, levels: &QuantileLevels) -> Result<Vec<QqPair>>
where
    A: SummaryStats<T>,
    B: SummaryStats<U>,
    T: FloatOpsTS,
    U: FloatOpsTS,
{
    let a = first.summary_profiles(levels)?;
    let b = second.summary_profiles(levels)?;

    Ok(ProfileKind::ALL
        .iter()
        .map(|&kind| QqPair {
            kind,
            levels: levels.as_slice().to_vec(),
            first: a.profile(kind).to_vec(),
            second: b.profile(kind).to_vec(),
        })
        .collect())
}
