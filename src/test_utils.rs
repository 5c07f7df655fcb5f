//! Builders for small synthetic ERA5-like datasets and an in-memory
//! reader/writer, for use in tests.
use std::{
    cell::{Ref, RefCell},
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, IxDyn};

use crate::{
    dataset::{CoordValues, Coordinate, DataVariable, GriddedDataset},
    error::PrepError,
    io::{DatasetReader, DatasetWriter},
    levels::PRESSURE_DIM_NAME,
    normalize::TIME_DIM_NAME,
};

const LATITUDES: [f64; 2] = [-31.75, -32.0];
const LONGITUDES: [f64; 2] = [115.75, 116.0];

/// `n` hourly timestamps starting at `start` (e.g. "2023-01-31T23:00:00").
///
/// # Panics
/// If `start` is not a valid ISO 8601 datetime.
pub fn hourly_times(start: &str, n: usize) -> Vec<NaiveDateTime> {
    let start: NaiveDateTime = start.parse().expect("test start time must be valid");
    (0..n as i64).map(|h| start + TimeDelta::hours(h)).collect()
}

fn default_units(varname: &str) -> &'static str {
    match varname {
        "t2m" | "d2m" => "K",
        "u10" | "v10" => "m s**-1",
        "tp" | "cp" | "lsp" | "e" => "m",
        "sp" => "Pa",
        "r" => "%",
        "q" => "kg kg**-1",
        _ => "1",
    }
}

fn horizontal_coords(ds: &mut GriddedDataset) {
    ds.insert_coord(
        "latitude",
        Coordinate::new(CoordValues::Float(Array1::from(LATITUDES.to_vec())))
            .with_attr("units", "degrees_north"),
    )
    .expect("new dataset cannot conflict");
    ds.insert_coord(
        "longitude",
        Coordinate::new(CoordValues::Float(Array1::from(LONGITUDES.to_vec())))
            .with_attr("units", "degrees_east"),
    )
    .expect("new dataset cannot conflict");
}

fn time_coord(times: &[NaiveDateTime]) -> Coordinate {
    Coordinate::new(CoordValues::Time(times.to_vec())).with_attr("long_name", "time")
}

/// A (valid_time, latitude, longitude) dataset on a 2 x 2 grid where every
/// value of each variable equals the value given for it.
pub fn surface_dataset(times: &[NaiveDateTime], vars: &[(&str, f64)]) -> GriddedDataset {
    let mut ds = GriddedDataset::new();
    ds.insert_coord(TIME_DIM_NAME, time_coord(times))
        .expect("new dataset cannot conflict");
    horizontal_coords(&mut ds);

    let shape = [times.len(), LATITUDES.len(), LONGITUDES.len()];
    for &(name, value) in vars {
        let var = DataVariable::new(
            &[TIME_DIM_NAME, "latitude", "longitude"],
            ArrayD::from_elem(IxDyn(&shape), value),
        )
        .expect("dims match shape")
        .with_attr("units", default_units(name));
        ds.insert_var(name, var).expect("all variables share one shape");
    }
    ds
}

/// A (valid_time, pressure_level, latitude, longitude) dataset where every
/// value at a given level equals that level, so extracted slices are easy
/// to identify.
pub fn pressure_dataset(times: &[NaiveDateTime], levels: &[f64], vars: &[&str]) -> GriddedDataset {
    let mut ds = GriddedDataset::new();
    ds.insert_coord(TIME_DIM_NAME, time_coord(times))
        .expect("new dataset cannot conflict");
    ds.insert_coord(
        PRESSURE_DIM_NAME,
        Coordinate::new(CoordValues::Float(Array1::from(levels.to_vec())))
            .with_attr("units", "hPa"),
    )
    .expect("new dataset cannot conflict");
    horizontal_coords(&mut ds);

    let shape = [times.len(), levels.len(), LATITUDES.len(), LONGITUDES.len()];
    let data = ArrayD::from_shape_fn(IxDyn(&shape), |idx| levels[idx[1]]);
    for &name in vars {
        let var = DataVariable::new(
            &[TIME_DIM_NAME, PRESSURE_DIM_NAME, "latitude", "longitude"],
            data.clone(),
        )
        .expect("dims match shape")
        .with_attr("units", default_units(name));
        ds.insert_var(name, var).expect("all variables share one shape");
    }
    ds
}

/// A [`DatasetReader`] and [`DatasetWriter`] that keeps everything in memory
/// and records which paths were opened and written.
#[derive(Debug, Default)]
pub struct MemoryIo {
    inputs: HashMap<PathBuf, GriddedDataset>,
    opened: RefCell<Vec<PathBuf>>,
    written: RefCell<IndexMap<PathBuf, GriddedDataset>>,
    fail_writes_after: Option<usize>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ds` the content returned when `path` is read.
    pub fn with_input<P: Into<PathBuf>>(mut self, path: P, ds: GriddedDataset) -> Self {
        self.inputs.insert(path.into(), ds);
        self
    }

    /// Make every write after the first `n` fail.
    pub fn failing_writes_after(mut self, n: usize) -> Self {
        self.fail_writes_after = Some(n);
        self
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.borrow().clone()
    }

    pub fn written(&self) -> Ref<'_, IndexMap<PathBuf, GriddedDataset>> {
        self.written.borrow()
    }
}

impl DatasetReader for MemoryIo {
    fn read(&self, path: &Path) -> error_stack::Result<GriddedDataset, PrepError> {
        self.opened.borrow_mut().push(path.to_path_buf());
        let ds = self
            .inputs
            .get(path)
            .cloned()
            .ok_or_else(|| PrepError::ReadingInput(path.to_path_buf()))?;
        Ok(ds)
    }
}

impl DatasetWriter for MemoryIo {
    fn extension(&self) -> &str {
        "nc"
    }

    fn write(&self, ds: &GriddedDataset, path: &Path) -> error_stack::Result<(), PrepError> {
        let mut written = self.written.borrow_mut();
        if self.fail_writes_after.is_some_and(|n| written.len() >= n) {
            return Err(PrepError::WritingOutput(path.to_path_buf()).into());
        }
        written.insert(path.to_path_buf(), ds.clone());
        Ok(())
    }
}
