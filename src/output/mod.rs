//! Output formatting for run and diff results.
//!
//! - [`json`]: The machine-readable report written to `--output-json`

pub mod json;

pub use json::{DiffReport, JsonOutputError, Report};
