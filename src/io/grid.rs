//! Loader for technology-specific reference grids.
//!
//! A grid lives in one directory per technology tag:
//!
//! ```text
//! <root>/UMI/configs.tsv
//! <root>/UMI/mean_profiles.tsv
//! <root>/UMI/sd_profiles.tsv
//! <root>/UMI/nonzero_profiles.tsv
//! ```
//!
//! `configs.tsv` has one column per simulation parameter (at least `depth_mean` and
//! `alpha_mean`) and one row per candidate. Each profile table has the quantile levels
//! as its header and one row per candidate, in the same order.

use crate::error::{Result, SimFitError};
use crate::matching::grid::{
    ALPHA_COLUMN, CandidateConfiguration, DEPTH_COLUMN, ReferenceGrid, Technology,
};
use crate::summary::{ProfileKind, QuantileLevels};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

pub const CONFIGS_FILE: &str = "configs.tsv";
pub const MEAN_FILE: &str = "mean_profiles.tsv";
pub const SD_FILE: &str = "sd_profiles.tsv";
pub const NONZERO_FILE: &str = "nonzero_profiles.tsv";

/// The four tables a grid is made of.
pub struct GridTables<R: Read> {
    pub configs: R,
    pub mean: R,
    pub sd: R,
    pub nonzero: R,
}

/// Load the grid of `technology` from `<root>/<tag>/`.
pub fn load_grid<P: AsRef<Path>>(root: P, technology: Technology) -> Result<ReferenceGrid> {
    let dir = root.as_ref().join(technology.tag());
    debug!("Loading {} reference grid from {}", technology, dir.display());

    let open = |name: &str| -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(dir.join(name))?))
    };

    read_grid(
        technology,
        GridTables {
            configs: open(CONFIGS_FILE)?,
            mean: open(MEAN_FILE)?,
            sd: open(SD_FILE)?,
            nonzero: open(NONZERO_FILE)?,
        },
    )
}

/// Build a grid from already opened tables.
pub fn read_grid<R: Read>(technology: Technology, tables: GridTables<R>) -> Result<ReferenceGrid> {
    let configurations = read_configurations(tables.configs)?;

    let (mean_levels, mean) = read_profile_table(tables.mean, ProfileKind::Mean)?;
    let (sd_levels, sd) = read_profile_table(tables.sd, ProfileKind::Sd)?;
    let (nonzero_levels, nonzero) = read_profile_table(tables.nonzero, ProfileKind::Nonzero)?;

    for (kind, levels) in [(ProfileKind::Sd, &sd_levels), (ProfileKind::Nonzero, &nonzero_levels)] {
        if !levels.matches(&mean_levels) {
            return Err(SimFitError::ShapeMismatch {
                context: format!("{} profile levels vs mean profile levels", kind),
                expected: mean_levels.len(),
                actual: levels.len(),
            });
        }
    }

    debug!(
        "Read {} configurations with {} quantile levels",
        configurations.len(),
        mean_levels.len()
    );
    ReferenceGrid::new(technology, mean_levels, configurations, mean, sd, nonzero)
}

fn tsv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader)
}

fn parse_value(field: &str, table: &str, row: usize, col: usize) -> Result<f64> {
    let trimmed = field.trim();
    match trimmed {
        "NA" | "NaN" | "nan" => Ok(f64::NAN),
        _ => trimmed.parse::<f64>().map_err(|_| SimFitError::Parse {
            value: field.to_string(),
            table: table.to_string(),
            row,
            col,
        }),
    }
}

fn read_configurations<R: Read>(reader: R) -> Result<Vec<CandidateConfiguration>> {
    let mut rdr = tsv_reader(reader);
    let names: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    for required in [DEPTH_COLUMN, ALPHA_COLUMN] {
        if !names.iter().any(|n| n == required) {
            return Err(SimFitError::MissingColumn {
                column: required.to_string(),
                table: CONFIGS_FILE.to_string(),
            });
        }
    }

    let mut configurations = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let mut parameters = BTreeMap::new();
        for (col, (name, field)) in names.iter().zip(record.iter()).enumerate() {
            let value = parse_value(field, CONFIGS_FILE, row + 1, col + 1)?;
            parameters.insert(name.clone(), value);
        }
        configurations.push(CandidateConfiguration::from_parameters(row, parameters)?);
    }
    Ok(configurations)
}

fn read_profile_table<R: Read>(reader: R, kind: ProfileKind) -> Result<(QuantileLevels, Array2<f64>)> {
    let table = format!("{} profiles", kind);
    let mut rdr = tsv_reader(reader);

    let levels = rdr
        .headers()?
        .iter()
        .enumerate()
        .map(|(col, h)| parse_value(h, &table, 0, col + 1))
        .collect::<Result<Vec<f64>>>()?;
    let levels = QuantileLevels::new(levels)?;

    let n_levels = levels.len();
    let mut values = Vec::new();
    let mut n_rows = 0;
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        for (col, field) in record.iter().enumerate() {
            values.push(parse_value(field, &table, row + 1, col + 1)?);
        }
        n_rows += 1;
    }

    let n_values = values.len();
    let matrix = Array2::from_shape_vec((n_rows, n_levels), values).map_err(|_| {
        SimFitError::ShapeMismatch {
            context: format!("{} table cells", kind),
            expected: n_rows * n_levels,
            actual: n_values,
        }
    })?;
    Ok((levels, matrix))
}
