//! Combine the three per-month ERA5 exports into one dataset.
//!
//! The CDS splits a month of single- and pressure-level data into three
//! netCDF files, recognizable by a marker in the file name:
//!
//! - "pressure": variables on pressure levels (e.g. r, q, w),
//! - "accum": accumulated variables (e.g. tp, cp, lsp, e),
//! - "instant": instantaneous variables (e.g. t2m, d2m, u10, v10, sp).
//!
//! [`merge_accum_instant_pressure`] finds these files, flattens the pressure
//! levels, aligns the three on their shared coordinates and merges them.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;

use crate::{
    dataset::{align_inner, merge_override, GriddedDataset},
    diagnostics::Diagnostics,
    error::PrepError,
    io::DatasetReader,
    levels::extract_pressure_levels,
};

/// File extensions (compared case-insensitively) treated as netCDF files.
pub const NETCDF_EXTENSIONS: [&str; 3] = ["nc", "nc4", "netcdf"];

/// The role a file plays within a month directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SourceFileKind {
    Pressure,
    Accum,
    Instant,
    Unrecognized,
}

impl SourceFileKind {
    /// Classify a file by its name. The markers "pressure", "accum" and
    /// "instant" are searched for case-insensitively in that order, so a name
    /// containing several markers takes the first one.
    pub fn classify(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        if name.contains("pressure") {
            Self::Pressure
        } else if name.contains("accum") {
            Self::Accum
        } else if name.contains("instant") {
            Self::Instant
        } else {
            Self::Unrecognized
        }
    }
}

/// Paths to the three source files of one month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthSources {
    pub pressure: PathBuf,
    pub accum: PathBuf,
    pub instant: PathBuf,
}

fn is_netcdf(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| NETCDF_EXTENSIONS.iter().any(|nc| e.eq_ignore_ascii_case(nc)))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Netcdf files directly inside `dir`, sorted by name.
pub fn list_netcdf_files(dir: &Path) -> error_stack::Result<Vec<PathBuf>, PrepError> {
    let entries = std::fs::read_dir(dir)
        .change_context_lazy(|| PrepError::ReadingInput(dir.to_path_buf()))?;
    let mut files = vec![];
    for entry in entries {
        let entry = entry.change_context_lazy(|| PrepError::ReadingInput(dir.to_path_buf()))?;
        let path = entry.path();
        if is_netcdf(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Identify the pressure, accumulated and instant files in `month_dir`.
///
/// # Errors
/// - [`PrepError::NoInputFiles`] if there are no netCDF files at all,
/// - [`PrepError::DuplicateInputs`] if two files have the same role,
/// - [`PrepError::MissingRequiredInputs`] if any role has no file.
pub fn find_month_sources(month_dir: &Path) -> error_stack::Result<MonthSources, PrepError> {
    let files = list_netcdf_files(month_dir)?;
    if files.is_empty() {
        return Err(PrepError::NoInputFiles(month_dir.to_path_buf()).into());
    }

    let mut pressure = vec![];
    let mut accum = vec![];
    let mut instant = vec![];
    for f in files.iter() {
        match SourceFileKind::classify(&file_name_of(f)) {
            SourceFileKind::Pressure => pressure.push(f.clone()),
            SourceFileKind::Accum => accum.push(f.clone()),
            SourceFileKind::Instant => instant.push(f.clone()),
            SourceFileKind::Unrecognized => {
                log::debug!("Ignoring unrecognized file {}", f.display())
            }
        }
    }

    for (kind, matches) in [
        (SourceFileKind::Pressure, &pressure),
        (SourceFileKind::Accum, &accum),
        (SourceFileKind::Instant, &instant),
    ] {
        if matches.len() > 1 {
            return Err(PrepError::DuplicateInputs {
                dir: month_dir.to_path_buf(),
                kind,
                files: matches.iter().map(|p| file_name_of(p)).collect(),
            }
            .into());
        }
    }

    match (pressure.pop(), accum.pop(), instant.pop()) {
        (Some(pressure), Some(accum), Some(instant)) => Ok(MonthSources {
            pressure,
            accum,
            instant,
        }),
        (p, a, i) => {
            let missing = [
                (SourceFileKind::Pressure, p.is_none()),
                (SourceFileKind::Accum, a.is_none()),
                (SourceFileKind::Instant, i.is_none()),
            ]
            .into_iter()
            .filter_map(|(kind, is_missing)| is_missing.then_some(kind))
            .collect();
            Err(PrepError::MissingRequiredInputs {
                dir: month_dir.to_path_buf(),
                missing,
                found: files.iter().map(|p| file_name_of(p)).collect(),
            }
            .into())
        }
    }
}

/// Merge the accumulated, instant and pressure-level files of `month_dir`.
///
/// Pressure-level variables are flattened to the levels in `pressure_levels`
/// (see [`extract_pressure_levels`]). The three datasets are restricted to
/// the coordinate values they share and merged in the order accumulated,
/// instant, pressure; a variable defined in more than one of them is taken
/// from the later one.
///
/// Each source is read completely by `reader`, which releases its file
/// before returning, so no file stays open after this function returns,
/// whether it succeeds or not.
pub fn merge_accum_instant_pressure<R: DatasetReader + ?Sized>(
    month_dir: &Path,
    reader: &R,
    pressure_levels: &[i64],
    diags: &mut Diagnostics,
) -> error_stack::Result<GriddedDataset, PrepError> {
    let sources = find_month_sources(month_dir)?;
    log::debug!(
        "Month sources: pressure = {}, accum = {}, instant = {}",
        sources.pressure.display(),
        sources.accum.display(),
        sources.instant.display()
    );

    let ds_pres = reader.read(&sources.pressure)?;
    let ds_acc = reader.read(&sources.accum)?;
    let ds_ins = reader.read(&sources.instant)?;

    let pl_ds = extract_pressure_levels(&ds_pres, pressure_levels, diags)
        .attach_printable_lazy(|| {
            format!("extracting levels from {}", sources.pressure.display())
        })?;
    drop(ds_pres);

    let aligned = align_inner(&[ds_acc, ds_ins, pl_ds]);
    let merged = merge_override(aligned)?;
    log::debug!(
        "Merged dataset has {} variables: {}",
        merged.num_vars(),
        merged.var_names().collect::<Vec<_>>().join(", ")
    );
    Ok(merged)
}
