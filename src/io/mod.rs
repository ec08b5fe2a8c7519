//! Reading of reference grids from tab-separated tables.

pub mod grid;

pub use grid::{GridTables, load_grid, read_grid};
