//! Matching of an observed dataset against a grid of simulated-dataset summaries.
//!
//! The query dataset is summarized into quantile profiles (see [`crate::summary`]) and
//! compared with the precomputed profiles of every candidate configuration in a
//! [`ReferenceGrid`]. For each of the three profile kinds the per-candidate distance is
//!
//! ```text
//! mean(|c - q|) + diag_distance(c, q, nbins)
//! ```
//!
//! computed on log10 values for the mean and sd profiles and on raw values for the
//! nonzero-fraction profile. The three distances are summed into one dissimilarity
//! score and candidates are ranked by it, lowest first.
//!
//! ## Module Organization
//!
//! - **[`diagonal`]**: binned deviation from the identity line
//! - **[`grid`]**: reference grid, candidate configurations and technology tags
//! - **[`engine`]**: filtering, validation, scoring and ranking
//! - **[`diagnostics`]**: profile pairs for plotting and the sinks that consume them

use crate::error::{Result, SimFitError};
use serde::{Deserialize, Serialize};

pub mod diagnostics;
pub mod diagonal;
pub mod engine;
pub mod grid;

pub use diagnostics::{
    DiagnosticScope, DiagnosticSink, ProfileDiagnostic, TsvDiagnosticSink, VecDiagnosticSink,
};
pub use diagonal::{DEFAULT_NBINS, diag_distance, directed_diag_distance};
pub use engine::{GridMatcher, MatchResult, RankedMatch, ScoreComponents, best_match_params};
pub use grid::{CandidateConfiguration, ReferenceGrid, Technology};

/// Default number of configurations returned by a match.
pub const DEFAULT_N_OPTIMAL: usize = 5;

/// Closed interval on a configuration parameter. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        ValueRange {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn unbounded() -> Self {
        ValueRange::default()
    }

    /// Range containing exactly one value.
    pub fn exactly(value: f64) -> Self {
        ValueRange::new(value, value)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.min.is_some_and(f64::is_nan) || self.max.is_some_and(f64::is_nan) {
            return Err(SimFitError::InvalidParameter(format!(
                "{} range has a NaN bound",
                name
            )));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(SimFitError::InvalidParameter(format!(
                    "{} range is empty: min {} > max {}",
                    name, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for a parameter-matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Number of best configurations to return
    pub n_optimal: usize,
    /// Allowed `depth_mean` values (inclusive)
    pub depth_range: ValueRange,
    /// Allowed `alpha_mean` values (inclusive)
    pub alpha_range: ValueRange,
    /// Bins used by the diagonal distance
    pub nbins: usize,
    /// Matches that receive diagnostic profile pairs
    pub diagnostics: DiagnosticScope,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            n_optimal: DEFAULT_N_OPTIMAL,
            depth_range: ValueRange::unbounded(),
            alpha_range: ValueRange::unbounded(),
            nbins: DEFAULT_NBINS,
            diagnostics: DiagnosticScope::default(),
        }
    }
}

impl MatchConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_n_optimal(mut self, n_optimal: usize) -> Self {
        self.n_optimal = n_optimal;
        self
    }

    pub fn with_depth_range(mut self, min: f64, max: f64) -> Self {
        self.depth_range = ValueRange::new(min, max);
        self
    }

    pub fn with_alpha_range(mut self, min: f64, max: f64) -> Self {
        self.alpha_range = ValueRange::new(min, max);
        self
    }

    pub fn with_nbins(mut self, nbins: usize) -> Self {
        self.nbins = nbins;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticScope) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_optimal == 0 {
            return Err(SimFitError::InvalidParameter(
                "n_optimal must be at least 1".to_string(),
            ));
        }
        if self.nbins == 0 {
            return Err(SimFitError::InvalidParameter(
                "nbins must be at least 1".to_string(),
            ));
        }
        self.depth_range.validate("depth")?;
        self.alpha_range.validate("alpha")?;
        Ok(())
    }
}
