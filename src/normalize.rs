//! Canonicalize the time axis of a merged dataset.
use chrono::TimeDelta;

use crate::{
    dataset::{CoordValues, GriddedDataset},
    error::PrepError,
};

/// Name every later step expects the time axis to have.
pub const TIME_DIM_NAME: &str = "valid_time";

/// Make sure the time axis is called [`TIME_DIM_NAME`].
///
/// If it already is, `ds` is returned unchanged. Otherwise a coordinate
/// named "time" is renamed, or failing that the first coordinate holding
/// date/time values. If neither exists, the dataset cannot be split by day
/// and [`PrepError::MissingTimeCoordinate`] is returned.
pub fn ensure_valid_time(mut ds: GriddedDataset) -> Result<GriddedDataset, PrepError> {
    if ds.coord(TIME_DIM_NAME).is_some() {
        return Ok(ds);
    }

    if ds.coord("time").is_some() {
        log::debug!("Renaming time coordinate 'time' to '{TIME_DIM_NAME}'");
        ds.rename_dim("time", TIME_DIM_NAME);
        return Ok(ds);
    }

    let found = ds
        .coords()
        .find(|(_, c)| c.values.is_time())
        .map(|(name, _)| name.clone());

    match found {
        Some(name) => {
            log::debug!("Renaming time coordinate '{name}' to '{TIME_DIM_NAME}'");
            ds.rename_dim(&name, TIME_DIM_NAME);
            Ok(ds)
        }
        None => Err(PrepError::MissingTimeCoordinate),
    }
}

/// Shift the time axis by `hours`, e.g. to move ERA5's UTC times to local time.
///
/// A zero shift returns `ds` as is and does not require a time axis.
pub fn shift_time(mut ds: GriddedDataset, hours: i64) -> Result<GriddedDataset, PrepError> {
    if hours == 0 {
        return Ok(ds);
    }

    let coord = ds
        .coord_mut(TIME_DIM_NAME)
        .ok_or(PrepError::MissingTimeCoordinate)?;
    let CoordValues::Time(times) = &mut coord.values else {
        return Err(PrepError::TimeNotDatetime(TIME_DIM_NAME.to_string()));
    };

    let delta = TimeDelta::hours(hours);
    for t in times.iter_mut() {
        *t += delta;
    }
    log::debug!("Shifted {} times by {hours} h", times.len());
    Ok(ds)
}
