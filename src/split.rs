//! Split a processed month into one file per calendar day.
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use error_stack::ResultExt;
use itertools::Itertools;

use crate::{
    dataset::GriddedDataset, error::PrepError, io::DatasetWriter, normalize::TIME_DIM_NAME,
};

/// Path of the file holding `day`: `<base>/<YYYY>/<MM>/<YYYYMMDD>.<ext>`.
pub fn daily_file_path(base: &Path, day: NaiveDate, extension: &str) -> PathBuf {
    base.join(day.format("%Y").to_string())
        .join(day.format("%m").to_string())
        .join(format!("{}.{extension}", day.format("%Y%m%d")))
}

/// Indices of the timestamps falling on `day`, i.e. within
/// `[day 00:00, day + 1 00:00)`.
fn indices_for_day(times: &[NaiveDateTime], day: NaiveDate) -> Vec<usize> {
    let start = day.and_time(chrono::NaiveTime::MIN);
    let end = start + TimeDelta::days(1);
    times
        .iter()
        .enumerate()
        .filter_map(|(i, t)| (*t >= start && *t < end).then_some(i))
        .collect()
}

/// Write each calendar day of `ds` to its own file under
/// `<processed_data_dir>/<destination_folder>`, creating directories as
/// needed, and return the paths written in date order.
///
/// The base directory is created even if `ds` holds no timestamps. If any
/// day fails to be written, the error is returned immediately and later days
/// are not attempted.
pub fn store_year_month_day_nc<W: DatasetWriter + ?Sized>(
    ds: &GriddedDataset,
    processed_data_dir: &Path,
    destination_folder: &str,
    writer: &W,
) -> error_stack::Result<Vec<PathBuf>, PrepError> {
    let base = processed_data_dir.join(destination_folder);
    std::fs::create_dir_all(&base).change_context_lazy(|| PrepError::WritingOutput(base.clone()))?;

    let times = ds
        .coord(TIME_DIM_NAME)
        .ok_or(PrepError::MissingTimeCoordinate)?
        .values
        .as_times()
        .ok_or_else(|| PrepError::TimeNotDatetime(TIME_DIM_NAME.to_string()))?;

    let days = times.iter().map(|t| t.date()).sorted().dedup();
    let mut written = vec![];
    for day in days {
        let indices = indices_for_day(times, day);
        if indices.is_empty() {
            continue;
        }

        let day_ds = ds.select(TIME_DIM_NAME, &indices);
        let path = daily_file_path(&base, day, writer.extension());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context_lazy(|| PrepError::WritingOutput(path.clone()))?;
        }
        writer
            .write(&day_ds, &path)
            .attach_printable_lazy(|| format!("writing {} time steps for {day}", indices.len()))?;
        log::debug!("Wrote {} time steps to {}", indices.len(), path.display());
        written.push(path);
    }
    Ok(written)
}
