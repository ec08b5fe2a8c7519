//! Gene-level summary statistics and their quantile profiles.
//!
//! An expression matrix (genes × cells) is reduced to three per-gene statistics:
//!
//! - **mean**: mean of `value + 1` over the non-missing entries of the gene
//! - **sd**: sample standard deviation (n − 1 denominator) over the non-missing entries
//! - **nonzero**: fraction of non-missing entries that are greater than zero
//!
//! Each statistic is then collapsed into a [`SummaryProfile`]-sized vector by sampling its
//! empirical quantile function at a shared set of [`QuantileLevels`]. Genes whose
//! statistic is undefined (no observed value, or a single observation for the sd) are
//! left out of the quantile step.
//!
//! Dense matrices use NaN to mark missing entries. For sparse matrices, implicit entries
//! are zero counts and explicitly stored NaNs are missing.

use crate::error::{Result, SimFitError};
use nalgebra_sparse::CsrMatrix;
use ndarray::{Array2, ArrayView2};
use num_traits::ToPrimitive;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use single_utilities::traits::FloatOpsTS;
use std::fmt;
use tracing::{debug, warn};

pub mod qq;
pub mod quantile;

pub use qq::{QqPair, qq_profiles};

/// One value per quantile level.
pub type SummaryProfile = Vec<f64>;

/// Ordered probability levels at which quantile profiles are sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileLevels(Vec<f64>);

impl QuantileLevels {
    /// Step of the default grid: 501 levels from 0 to 1.
    pub const DEFAULT_STEP: f64 = 0.002;

    /// Tolerance used when comparing levels that went through a text round trip.
    pub const TOLERANCE: f64 = 1e-9;

    /// Build levels from explicit probabilities.
    ///
    /// Levels must be non-empty, within `[0, 1]` and non-decreasing.
    pub fn new(levels: Vec<f64>) -> Result<Self> {
        if levels.is_empty() {
            return Err(SimFitError::InvalidParameter(
                "quantile levels cannot be empty".to_string(),
            ));
        }
        for (i, &p) in levels.iter().enumerate() {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimFitError::InvalidParameter(format!(
                    "quantile level at index {} is outside [0, 1]: {}",
                    i, p
                )));
            }
        }
        if levels.windows(2).any(|w| w[1] < w[0]) {
            return Err(SimFitError::InvalidParameter(
                "quantile levels must be non-decreasing".to_string(),
            ));
        }
        Ok(QuantileLevels(levels))
    }

    /// Levels `0, step, 2 * step, ...` up to and including 1.
    ///
    /// When `step` does not divide 1, the last gap is shorter and the levels still end at 1.
    pub fn evenly_spaced(step: f64) -> Result<Self> {
        if !(step > 0.0 && step <= 1.0) {
            return Err(SimFitError::InvalidParameter(format!(
                "quantile step must be in (0, 1], got {}",
                step
            )));
        }
        let n_steps = (1.0 / step + Self::TOLERANCE).floor() as usize;
        let mut levels: Vec<f64> = (0..=n_steps).map(|i| (i as f64 * step).min(1.0)).collect();
        match levels.last_mut() {
            Some(last) if 1.0 - *last <= Self::TOLERANCE => *last = 1.0,
            _ => levels.push(1.0),
        }
        QuantileLevels::new(levels)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether both grids have the same length and agree level by level.
    pub fn matches(&self, other: &QuantileLevels) -> bool {
        self.len() == other.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| (a - b).abs() <= Self::TOLERANCE)
    }
}

impl Default for QuantileLevels {
    fn default() -> Self {
        let n_steps = (1.0 / Self::DEFAULT_STEP).round() as usize;
        QuantileLevels(
            (0..=n_steps)
                .map(|i| (i as f64 * Self::DEFAULT_STEP).min(1.0))
                .collect(),
        )
    }
}

/// Scale on which a profile kind is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    Log10,
    Linear,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Log10 => "log10",
            Scale::Linear => "linear",
        }
    }
}

/// The three gene-level statistics a dataset is summarized by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileKind {
    Mean,
    Nonzero,
    Sd,
}

impl ProfileKind {
    /// All kinds, in the order their distances are accumulated.
    pub const ALL: [ProfileKind; 3] = [ProfileKind::Mean, ProfileKind::Nonzero, ProfileKind::Sd];

    pub fn scale(&self) -> Scale {
        match self {
            ProfileKind::Mean | ProfileKind::Sd => Scale::Log10,
            ProfileKind::Nonzero => Scale::Linear,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Mean => "mean",
            ProfileKind::Nonzero => "nonzero",
            ProfileKind::Sd => "sd",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw per-gene statistics, one entry per matrix row. NaN marks an undefined value.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneStatistics {
    pub mean: Vec<f64>,
    pub sd: Vec<f64>,
    pub nonzero: Vec<f64>,
}

impl GeneStatistics {
    pub fn n_genes(&self) -> usize {
        self.mean.len()
    }

    pub fn statistic(&self, kind: ProfileKind) -> &[f64] {
        match kind {
            ProfileKind::Mean => &self.mean,
            ProfileKind::Nonzero => &self.nonzero,
            ProfileKind::Sd => &self.sd,
        }
    }

    /// Reduce every statistic to its quantile profile at `levels`.
    pub fn into_profiles(self, levels: &QuantileLevels) -> Result<SummaryProfiles> {
        if self.n_genes() == 0 {
            return Err(SimFitError::EmptyInput(
                "expression matrix has no genes".to_string(),
            ));
        }

        let unobserved = self.mean.iter().filter(|v| v.is_nan()).count();
        if unobserved > 0 {
            warn!(
                "{} of {} genes have no observed value and are left out of the profiles",
                unobserved,
                self.n_genes()
            );
        }

        let mean = quantile::quantiles(&self.mean, levels.as_slice())?;
        let sd = quantile::quantiles(&self.sd, levels.as_slice())?;
        let nonzero = quantile::quantiles(&self.nonzero, levels.as_slice())?;

        Ok(SummaryProfiles {
            levels: levels.clone(),
            mean,
            sd,
            nonzero,
        })
    }
}

/// The quantile profiles of a dataset's mean, sd and nonzero-fraction statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryProfiles {
    pub levels: QuantileLevels,
    pub mean: SummaryProfile,
    pub sd: SummaryProfile,
    pub nonzero: SummaryProfile,
}

impl SummaryProfiles {
    /// Assemble profiles computed elsewhere, checking that every profile fits `levels`.
    pub fn new(
        levels: QuantileLevels,
        mean: SummaryProfile,
        sd: SummaryProfile,
        nonzero: SummaryProfile,
    ) -> Result<Self> {
        for (kind, profile) in [
            (ProfileKind::Mean, &mean),
            (ProfileKind::Sd, &sd),
            (ProfileKind::Nonzero, &nonzero),
        ] {
            if profile.len() != levels.len() {
                return Err(SimFitError::ShapeMismatch {
                    context: format!("{} profile length", kind),
                    expected: levels.len(),
                    actual: profile.len(),
                });
            }
        }
        Ok(SummaryProfiles {
            levels,
            mean,
            sd,
            nonzero,
        })
    }

    pub fn profile(&self, kind: ProfileKind) -> &[f64] {
        match kind {
            ProfileKind::Mean => &self.mean,
            ProfileKind::Nonzero => &self.nonzero,
            ProfileKind::Sd => &self.sd,
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Summary statistics over the genes (rows) of an expression matrix.
pub trait SummaryStats<T>
where
    T: FloatOpsTS,
{
    /// Per-gene mean(value + 1), sd and nonzero fraction.
    fn gene_statistics(&self) -> GeneStatistics;

    /// Quantile profiles of the gene statistics at `levels`.
    fn summary_profiles(&self, levels: &QuantileLevels) -> Result<SummaryProfiles> {
        let stats = self.gene_statistics();
        debug!("Computed statistics for {} genes", stats.n_genes());
        stats.into_profiles(levels)
    }
}

/// Profiles of `matrix` at the default 501 quantile levels.
pub fn extract_profiles<M, T>(matrix: &M) -> Result<SummaryProfiles>
where
    M: SummaryStats<T>,
    T: FloatOpsTS,
{
    matrix.summary_profiles(&QuantileLevels::default())
}

impl<T> SummaryStats<T> for Array2<T>
where
    T: FloatOpsTS,
{
    fn gene_statistics(&self) -> GeneStatistics {
        dense_gene_statistics(self.view())
    }
}

impl<T> SummaryStats<T> for ArrayView2<'_, T>
where
    T: FloatOpsTS,
{
    fn gene_statistics(&self) -> GeneStatistics {
        dense_gene_statistics(self.view())
    }
}

impl<T> SummaryStats<T> for CsrMatrix<T>
where
    T: FloatOpsTS,
{
    fn gene_statistics(&self) -> GeneStatistics {
        let n_cells = self.ncols();
        let per_gene: Vec<(f64, f64, f64)> = (0..self.nrows())
            .into_par_iter()
            .map(|gene| {
                let row = self.row(gene);
                let mut acc = GeneAccumulator::default();
                for value in row.values() {
                    acc.push(ToPrimitive::to_f64(value).unwrap_or(f64::NAN));
                }
                acc.push_zeros(n_cells - row.nnz());
                acc.finish()
            })
            .collect();
        collect_statistics(per_gene)
    }
}

fn dense_gene_statistics<T>(matrix: ArrayView2<'_, T>) -> GeneStatistics
where
    T: FloatOpsTS,
{
    let per_gene: Vec<(f64, f64, f64)> = (0..matrix.nrows())
        .into_par_iter()
        .map(|gene| {
            let mut acc = GeneAccumulator::default();
            for value in matrix.row(gene).iter() {
                acc.push(ToPrimitive::to_f64(value).unwrap_or(f64::NAN));
            }
            acc.finish()
        })
        .collect();
    collect_statistics(per_gene)
}

fn collect_statistics(per_gene: Vec<(f64, f64, f64)>) -> GeneStatistics {
    let mut mean = Vec::with_capacity(per_gene.len());
    let mut sd = Vec::with_capacity(per_gene.len());
    let mut nonzero = Vec::with_capacity(per_gene.len());
    for (m, s, nz) in per_gene {
        mean.push(m);
        sd.push(s);
        nonzero.push(nz);
    }
    GeneStatistics { mean, sd, nonzero }
}

/// Running moments of one gene (Welford), skipping missing values.
#[derive(Debug, Default, Clone, Copy)]
struct GeneAccumulator {
    n: usize,
    n_nonzero: usize,
    mean: f64,
    m2: f64,
}

impl GeneAccumulator {
    fn push(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.n += 1;
        if value > 0.0 {
            self.n_nonzero += 1;
        }
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Merge `count` zero observations at once.
    fn push_zeros(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let n_a = self.n as f64;
        let n_b = count as f64;
        let total = n_a + n_b;
        let delta = -self.mean;
        self.m2 += delta * delta * n_a * n_b / total;
        self.mean += delta * n_b / total;
        self.n += count;
    }

    /// (mean of value + 1, sample sd, nonzero fraction)
    fn finish(&self) -> (f64, f64, f64) {
        if self.n == 0 {
            return (f64::NAN, f64::NAN, f64::NAN);
        }
        let n = self.n as f64;
        let sd = if self.n > 1 {
            (self.m2.max(0.0) / (n - 1.0)).sqrt()
        } else {
            f64::NAN
        };
        (self.mean + 1.0, sd, self.n_nonzero as f64 / n)
    }
}
