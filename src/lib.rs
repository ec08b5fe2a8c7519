//! # single-simfit
//!
//! Summary-statistic profiling and simulation parameter matching for single-cell data, part of
//! the single-rust ecosystem.
//!
//! This crate judges how closely a simulated expression dataset reproduces a real one and picks
//! the simulation parameters that best match an observed dataset. Datasets are compared through
//! quantile profiles of three gene-level statistics (mean, standard deviation and fraction of
//! nonzero entries), and candidate parameter sets are ranked against a precomputed grid of
//! simulated profiles.
//!
//! ## Core Features
//!
//! - **Profile Extraction**: Per-gene statistics reduced to type 7 quantile profiles, for dense
//!   `ndarray` and sparse `CsrMatrix` inputs
//! - **Parameter Matching**: Filtering, scoring and ranking of a technology-specific reference grid
//! - **Diagonal Fit**: Binned deviation of paired profiles from the identity line
//! - **Diagnostics**: Profile pairs for QQ-style plots, returned as data
//! - **Differential Expression**: Theoretical fold changes, differential EVF counts and Wilcoxon
//!   tests for simulated populations
//!
//! ## Quick Start
//!
//! Load a grid with [`io::load_grid`], summarize your counts with the [`summary::SummaryStats`]
//! trait and rank the grid with [`matching::GridMatcher`]. The returned
//! [`matching::MatchResult`] carries the best configurations, their scores and the diagnostic
//! profile pairs of the top match.
//!
//! ## Module Organization
//!
//! - **[`summary`]**: Gene statistics, quantile levels and profiles, QQ comparison
//! - **[`matching`]**: Reference grid, diagonal distance, ranking engine and diagnostics
//! - **[`io`]**: Reading reference grids from tab-separated tables
//! - **[`differential`]**: Differential-expression helpers for simulated data
//! - **[`error`]**: Error type shared by profiling, loading and matching

pub mod differential;
pub mod error;
pub mod io;
pub mod matching;
pub mod summary;

pub use error::{Result, SimFitError};
