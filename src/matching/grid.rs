//! Precomputed reference grid of simulated-dataset profiles.

use crate::error::{Result, SimFitError};
use crate::summary::{ProfileKind, QuantileLevels};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Parameter column holding the mean sequencing depth of a configuration.
pub const DEPTH_COLUMN: &str = "depth_mean";
/// Parameter column holding the mean capture efficiency of a configuration.
pub const ALPHA_COLUMN: &str = "alpha_mean";

/// Sequencing technology a reference grid was simulated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Technology {
    /// Protocols with unique molecular identifiers.
    Umi,
    /// Full-length protocols without UMIs, including PCR amplification noise.
    NonUmi,
}

impl Technology {
    /// Tag addressing the grid of this technology.
    pub fn tag(&self) -> &'static str {
        match self {
            Technology::Umi => "UMI",
            Technology::NonUmi => "nonUMI",
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Technology {
    type Err = SimFitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "UMI" | "umi" => Ok(Technology::Umi),
            "nonUMI" | "non-UMI" | "nonumi" | "non-umi" => Ok(Technology::NonUmi),
            other => Err(SimFitError::InvalidParameter(format!(
                "unknown technology tag '{}', expected 'UMI' or 'nonUMI'",
                other
            ))),
        }
    }
}

/// One simulation parameter set of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfiguration {
    /// Row of this configuration in the grid tables.
    pub index: usize,
    pub depth_mean: f64,
    pub alpha_mean: f64,
    /// Every parameter column of the configuration table, by name.
    pub parameters: BTreeMap<String, f64>,
}

impl CandidateConfiguration {
    /// Build a configuration from its parameter columns.
    ///
    /// `depth_mean` and `alpha_mean` must be present.
    pub fn from_parameters(index: usize, parameters: BTreeMap<String, f64>) -> Result<Self> {
        let depth_mean = *parameters
            .get(DEPTH_COLUMN)
            .ok_or_else(|| SimFitError::MissingColumn {
                column: DEPTH_COLUMN.to_string(),
                table: "configuration parameters".to_string(),
            })?;
        let alpha_mean = *parameters
            .get(ALPHA_COLUMN)
            .ok_or_else(|| SimFitError::MissingColumn {
                column: ALPHA_COLUMN.to_string(),
                table: "configuration parameters".to_string(),
            })?;

        Ok(CandidateConfiguration {
            index,
            depth_mean,
            alpha_mean,
            parameters,
        })
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }
}

/// Candidate configurations together with their precomputed profile triples.
///
/// Row `i` of every profile table belongs to `configurations[i]`. The grid is not
/// mutated after construction.
#[derive(Debug, Clone)]
pub struct ReferenceGrid {
    technology: Technology,
    levels: QuantileLevels,
    configurations: Vec<CandidateConfiguration>,
    mean: Array2<f64>,
    sd: Array2<f64>,
    nonzero: Array2<f64>,
}

impl ReferenceGrid {
    pub fn new(
        technology: Technology,
        levels: QuantileLevels,
        configurations: Vec<CandidateConfiguration>,
        mean: Array2<f64>,
        sd: Array2<f64>,
        nonzero: Array2<f64>,
    ) -> Result<Self> {
        let n_configs = configurations.len();
        for (kind, table) in [
            (ProfileKind::Mean, &mean),
            (ProfileKind::Sd, &sd),
            (ProfileKind::Nonzero, &nonzero),
        ] {
            if table.nrows() != n_configs {
                return Err(SimFitError::ShapeMismatch {
                    context: format!("{} profile table rows vs configurations", kind),
                    expected: n_configs,
                    actual: table.nrows(),
                });
            }
            if table.ncols() != levels.len() {
                return Err(SimFitError::ShapeMismatch {
                    context: format!("{} profile table columns vs quantile levels", kind),
                    expected: levels.len(),
                    actual: table.ncols(),
                });
            }
        }

        for (row, config) in configurations.iter().enumerate() {
            if config.index != row {
                return Err(SimFitError::InvalidParameter(format!(
                    "configuration at row {} carries index {}",
                    row, config.index
                )));
            }
        }

        Ok(ReferenceGrid {
            technology,
            levels,
            configurations,
            mean,
            sd,
            nonzero,
        })
    }

    pub fn technology(&self) -> Technology {
        self.technology
    }

    pub fn levels(&self) -> &QuantileLevels {
        &self.levels
    }

    pub fn configurations(&self) -> &[CandidateConfiguration] {
        &self.configurations
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    /// Precomputed profile of `kind` for the configuration at `index`.
    pub fn profile(&self, index: usize, kind: ProfileKind) -> ArrayView1<'_, f64> {
        let table = match kind {
            ProfileKind::Mean => &self.mean,
            ProfileKind::Nonzero => &self.nonzero,
            ProfileKind::Sd => &self.sd,
        };
        table.row(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(depth: f64, alpha: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (DEPTH_COLUMN.to_string(), depth),
            (ALPHA_COLUMN.to_string(), alpha),
            ("nPCR1".to_string(), 16.0),
        ])
    }

    #[test]
    fn test_technology_tags() {
        assert_eq!("UMI".parse::<Technology>().unwrap(), Technology::Umi);
        assert_eq!("nonUMI".parse::<Technology>().unwrap(), Technology::NonUmi);
        assert_eq!("non-UMI".parse::<Technology>().unwrap(), Technology::NonUmi);
        assert!("smartseq".parse::<Technology>().is_err());
        assert_eq!(Technology::NonUmi.to_string(), "nonUMI");
    }

    #[test]
    fn test_configuration_requires_depth_and_alpha() {
        let config = CandidateConfiguration::from_parameters(0, params(5e4, 0.1)).unwrap();
        assert_eq!(config.depth_mean, 5e4);
        assert_eq!(config.alpha_mean, 0.1);
        assert_eq!(config.parameter("nPCR1"), Some(16.0));

        let mut missing = params(5e4, 0.1);
        missing.remove(ALPHA_COLUMN);
        let result = CandidateConfiguration::from_parameters(0, missing);
        assert!(matches!(result, Err(SimFitError::MissingColumn { .. })));
    }

    #[test]
    fn test_grid_shape_validation() {
        let levels = QuantileLevels::new(vec![0.0, 0.5, 1.0]).unwrap();
        let configs = vec![
            CandidateConfiguration::from_parameters(0, params(1e4, 0.05)).unwrap(),
            CandidateConfiguration::from_parameters(1, params(2e4, 0.1)).unwrap(),
        ];

        let ok = ReferenceGrid::new(
            Technology::Umi,
            levels.clone(),
            configs.clone(),
            Array2::ones((2, 3)),
            Array2::ones((2, 3)),
            Array2::zeros((2, 3)),
        )
        .unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.profile(1, ProfileKind::Nonzero).len(), 3);

        let wrong_rows = ReferenceGrid::new(
            Technology::Umi,
            levels.clone(),
            configs.clone(),
            Array2::ones((3, 3)),
            Array2::ones((2, 3)),
            Array2::zeros((2, 3)),
        );
        assert!(matches!(wrong_rows, Err(SimFitError::ShapeMismatch { .. })));

        let wrong_cols = ReferenceGrid::new(
            Technology::Umi,
            levels,
            configs,
            Array2::ones((2, 3)),
            Array2::ones((2, 4)),
            Array2::zeros((2, 3)),
        );
        assert!(matches!(wrong_cols, Err(SimFitError::ShapeMismatch { .. })));
    }
}
