//! Error types for profile extraction, grid loading and parameter matching.

use thiserror::Error;

/// Errors raised while summarizing matrices or matching them against a reference grid.
///
/// Every matching error is detected during validation, before any candidate is ranked.
#[derive(Error, Debug)]
pub enum SimFitError {
    #[error("No candidate configuration left after filtering ({0})")]
    EmptyCandidateSet(String),

    #[error("Invalid {kind} profile for {source_label} at level index {position}: {value}")]
    InvalidProfile {
        kind: String,
        source_label: String,
        position: usize,
        value: f64,
    },

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing column '{column}' in {table}")]
    MissingColumn { column: String, table: String },

    #[error("Cannot parse '{value}' in {table}, row {row}, column {col}")]
    Parse {
        value: String,
        table: String,
        row: usize,
        col: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, SimFitError>;
