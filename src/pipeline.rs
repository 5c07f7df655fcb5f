//! Drive the month-by-month preprocessing of an ERA5 download.
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use error_stack::ResultExt;

use crate::{
    config::Config,
    diagnostics::Diagnostics,
    error::PrepError,
    io::{DatasetReader, DatasetWriter},
    merge::merge_accum_instant_pressure,
    normalize::{ensure_valid_time, shift_time},
    select::select_variables,
    split::store_year_month_day_nc,
    units::apply_unit_conversions,
};

/// One `<YYYY>/<MM>` directory of source files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthDirectory {
    pub year: i32,
    pub month: u32,
    pub path: PathBuf,
}

impl Display for MonthDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}/{:02}", self.year, self.month)
    }
}

/// Find the `<YYYY>/<MM>` directories under `base`, sorted by year then month.
///
/// Year directories must be named with four digits and month directories
/// with two digits, the first of which is 0 or 1. Other entries are ignored.
pub fn find_year_month_folders(
    base: &Path,
) -> error_stack::Result<Vec<MonthDirectory>, PrepError> {
    // The base directory is taken literally, only the year/month part is a pattern.
    let escaped_base = glob::Pattern::escape(&base.to_string_lossy());
    let pattern = format!(
        "{escaped_base}{}[0-9][0-9][0-9][0-9]{}[0-1][0-9]",
        std::path::MAIN_SEPARATOR,
        std::path::MAIN_SEPARATOR
    );
    let matches = glob::glob(&pattern)
        .change_context_lazy(|| PrepError::FindingMonths(base.to_path_buf()))
        .attach_printable_lazy(|| format!("glob pattern was {pattern}"))?;

    let mut months = vec![];
    for m in matches {
        let path = m.change_context_lazy(|| PrepError::FindingMonths(base.to_path_buf()))?;
        if !path.is_dir() {
            continue;
        }
        let parse_component = |p: Option<&Path>| -> Option<String> {
            p.and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
        };
        let month = parse_component(Some(path.as_path())).and_then(|s| s.parse::<u32>().ok());
        let year = parse_component(path.parent()).and_then(|s| s.parse::<i32>().ok());
        if let (Some(year), Some(month)) = (year, month) {
            months.push(MonthDirectory { year, month, path });
        }
    }
    months.sort();
    Ok(months)
}

/// The step a month was in when it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MonthStage {
    Merging,
    TimeNormalizing,
    UnitConverting,
    Selecting,
    Splitting,
    Done,
}

/// Everything [`process_month`] needs besides the month itself and the I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub timezone_shift_hours: i64,
    pub variables: Vec<String>,
    pub pressure_levels: Vec<i64>,
    pub processed_data_dir: PathBuf,
    pub destination_folder: String,
}

/// Merge, normalize, convert, subset and split one month of data.
///
/// Non-fatal problems are pushed onto `diags`. The returned report has the
/// [`MonthStage`] that failed attached.
pub fn process_month<R, W>(
    month: &MonthDirectory,
    settings: &PipelineSettings,
    reader: &R,
    writer: &W,
    diags: &mut Diagnostics,
) -> error_stack::Result<Vec<PathBuf>, PrepError>
where
    R: DatasetReader + ?Sized,
    W: DatasetWriter + ?Sized,
{
    log::debug!("{month}: {}", MonthStage::Merging);
    let merged = merge_accum_instant_pressure(&month.path, reader, &settings.pressure_levels, diags)
        .attach_printable(MonthStage::Merging)?;

    log::debug!("{month}: {}", MonthStage::TimeNormalizing);
    let ds = ensure_valid_time(merged)
        .and_then(|ds| shift_time(ds, settings.timezone_shift_hours))
        .attach_printable(MonthStage::TimeNormalizing)?;

    // Conversions are total, so this stage cannot fail.
    log::debug!("{month}: {}", MonthStage::UnitConverting);
    let ds = apply_unit_conversions(&ds);

    log::debug!("{month}: {}", MonthStage::Selecting);
    let ds = select_variables(&ds, &settings.variables, diags)
        .attach_printable(MonthStage::Selecting)?;

    log::debug!("{month}: {}", MonthStage::Splitting);
    let paths = store_year_month_day_nc(
        &ds,
        &settings.processed_data_dir,
        &settings.destination_folder,
        writer,
    )
    .attach_printable(MonthStage::Splitting)?;

    log::debug!("{month}: {}", MonthStage::Done);
    Ok(paths)
}

/// Log every diagnostic collected while processing `month` as a warning.
pub fn log_diagnostics(month: &MonthDirectory, diags: &Diagnostics) {
    for diag in diags {
        log::warn!("{month}: {diag}");
    }
}

/// A month that could not be processed.
#[derive(Debug)]
pub struct MonthFailure {
    pub month: MonthDirectory,
    pub reason: error_stack::Report<PrepError>,
}

/// Outcome of a [`run`] over several months.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: Vec<MonthDirectory>,
    pub failed: Vec<MonthFailure>,
    pub days_written: usize,
    pub warnings: usize,
}

impl RunSummary {
    pub fn months_processed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn log(&self) {
        log::info!(
            "Processed {} month(s): {} succeeded, {} failed, {} daily file(s) written, \
             {} warning(s)",
            self.months_processed(),
            self.succeeded.len(),
            self.failed.len(),
            self.days_written,
            self.warnings
        );
        for failure in self.failed.iter() {
            log::info!("  {} failed: {}", failure.month, failure.reason.current_context());
        }
    }
}

/// Process `months` in order. A month that fails is logged and recorded in
/// the summary; the remaining months are still processed.
pub fn run<R, W>(
    months: &[MonthDirectory],
    settings: &PipelineSettings,
    reader: &R,
    writer: &W,
) -> RunSummary
where
    R: DatasetReader + ?Sized,
    W: DatasetWriter + ?Sized,
{
    let mut summary = RunSummary::default();
    for month in months {
        log::info!("Processing {month} ({})", month.path.display());
        let mut diags = Diagnostics::new();
        let result = process_month(month, settings, reader, writer, &mut diags);
        log_diagnostics(month, &diags);
        summary.warnings += diags.len();

        match result {
            Ok(paths) => {
                log::info!("Finished {month}: wrote {} daily file(s)", paths.len());
                summary.days_written += paths.len();
                summary.succeeded.push(month.clone());
            }
            Err(e) => {
                log::error!("Error processing {month}: {e:?}");
                summary.failed.push(MonthFailure {
                    month: month.clone(),
                    reason: e,
                });
            }
        }
    }
    summary
}

/// What [`run_from_config`] did.
#[derive(Debug)]
pub enum RunOutcome {
    /// `preprocess` was false, so nothing was read or written.
    Disabled,
    /// The input directory had no `<YYYY>/<MM>` subdirectories.
    NoMonths(PathBuf),
    /// Every month found was processed; some may have failed.
    Ran(RunSummary),
}

/// Run the whole preprocessing described by `config`.
///
/// Returns [`RunOutcome::Disabled`] without touching the filesystem if
/// preprocessing is turned off. Fails with [`PrepError::InvalidConfig`] if a
/// key needed for the run is missing, or [`PrepError::FindingMonths`] if the
/// input directory cannot be searched. Failures of individual months are
/// part of the returned [`RunSummary`], not errors.
pub fn run_from_config<R, W>(
    config: &Config,
    reader: &R,
    writer: &W,
) -> error_stack::Result<RunOutcome, PrepError>
where
    R: DatasetReader + ?Sized,
    W: DatasetWriter + ?Sized,
{
    if !config.preprocess {
        log::info!("preprocess is false in the configuration, nothing to do");
        return Ok(RunOutcome::Disabled);
    }

    let (input_dir, settings) = config
        .pipeline_settings()
        .change_context(PrepError::InvalidConfig)?;

    let months = find_year_month_folders(&input_dir)?;
    if months.is_empty() {
        log::info!("No year/month directories found under {}", input_dir.display());
        return Ok(RunOutcome::NoMonths(input_dir));
    }
    log::info!(
        "Found {} month(s) under {}, writing daily files to {}",
        months.len(),
        input_dir.display(),
        settings
            .processed_data_dir
            .join(&settings.destination_folder)
            .display()
    );

    let summary = run(&months, &settings, reader, writer);
    summary.log();
    Ok(RunOutcome::Ran(summary))
}
