//! Common errors across the ecmwf-prep crate
use std::path::PathBuf;

use itertools::Itertools;

use crate::merge::SourceFileKind;

/// Errors that can stop the processing of one month of ECMWF data.
///
/// Every variant is fatal for the month it occurs in; the run as a whole
/// continues with the next month (see [`crate::pipeline::run`]).
#[derive(Debug, thiserror::Error)]
pub enum PrepError {
    /// The month directory contained no NetCDF files at all.
    #[error("No NetCDF files found in {}", .0.display())]
    NoInputFiles(PathBuf),

    /// At least one of the pressure, accumulated, or instant files was not found.
    #[error(
        "Missing required ECMWF files in {} (no {} file). Found: {}",
        .dir.display(),
        .missing.iter().join("/"),
        .found.iter().join(", ")
    )]
    MissingRequiredInputs {
        dir: PathBuf,
        missing: Vec<SourceFileKind>,
        found: Vec<String>,
    },

    /// More than one file in the month directory matched the same category.
    #[error("Multiple {kind} files found in {}: {}", .dir.display(), .files.iter().join(", "))]
    DuplicateInputs {
        dir: PathBuf,
        kind: SourceFileKind,
        files: Vec<String>,
    },

    /// No coordinate could be identified as the time axis.
    #[error("Dataset has no time coordinate")]
    MissingTimeCoordinate,

    /// The time coordinate exists but does not hold date/time values.
    #[error("Time coordinate '{0}' does not contain date/time values")]
    TimeNotDatetime(String),

    /// None of the configured variables were present after merging.
    #[error(
        "No requested variables are present in dataset after merge (requested: {})",
        .requested.iter().join(", ")
    )]
    NoVariablesPresent { requested: Vec<String> },

    /// Two arrays that must share a dimension disagree on its length.
    #[error("Dimension '{dim}' of '{name}' has length {actual}, expected {expected}")]
    DimensionMismatch {
        dim: String,
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A variable's data does not match the dimensions it was declared with.
    #[error("Variable has {ndim} dimension names but its data has {shape_len} axes")]
    ShapeMismatch { ndim: usize, shape_len: usize },

    /// A coordinate holds fill values, so some of its labels are unknown.
    #[error("Coordinate '{name}' has {count} missing or fill values")]
    MissingCoordinateValues { name: String, count: usize },

    /// A CF time units string could not be understood.
    #[error("Could not interpret time units '{0}'")]
    BadTimeUnits(String),

    #[error("Error reading input file {}", .0.display())]
    ReadingInput(PathBuf),

    #[error("Error writing output file {}", .0.display())]
    WritingOutput(PathBuf),

    #[error("Error searching for month directories under {}", .0.display())]
    FindingMonths(PathBuf),

    #[error("The configuration is incomplete or invalid")]
    InvalidConfig,
}
