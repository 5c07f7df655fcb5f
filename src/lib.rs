//! Preprocessing of monthly ERA5 reanalysis downloads into daily netCDF files.
//!
//! Each `<YYYY>/<MM>` input directory holds the accumulated, instantaneous and
//! pressure-level files the Copernicus Climate Data Store delivers for one
//! month. [`pipeline::process_month`] merges them, puts the time axis in
//! local time, converts temperatures and wind speeds, keeps the configured
//! variables and writes one file per day.
pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod levels;
pub mod logging;
pub mod merge;
pub mod nc_utils;
pub mod nctime;
pub mod normalize;
pub mod pipeline;
pub mod select;
pub mod split;
pub mod units;

#[cfg(test)]
pub(crate) mod test_utils;
