//! Flatten pressure-level variables into single-level variables.
//!
//! For example, `r(valid_time, pressure_level, latitude, longitude)` becomes
//! `r1000`, `r850` and `r500`, each `(valid_time, latitude, longitude)`.
use error_stack::ResultExt;

use crate::{
    dataset::GriddedDataset,
    diagnostics::{Diagnostic, Diagnostics},
    error::PrepError,
};

/// Name of the vertical dimension in ERA5 pressure-level files.
pub const PRESSURE_DIM_NAME: &str = "pressure_level";

/// Levels (hPa) extracted when the configuration does not list any.
pub const DEFAULT_PRESSURE_LEVELS: [i64; 3] = [1000, 850, 500];

/// Index of the level closest to `target`; the lowest index wins ties.
pub fn nearest_level_index(levels: &[i64], target: i64) -> Option<usize> {
    levels
        .iter()
        .enumerate()
        .min_by_key(|(_, lev)| (**lev - target).abs())
        .map(|(i, _)| i)
}

fn level_values(ds: &GriddedDataset) -> Option<Vec<i64>> {
    match ds.coord(PRESSURE_DIM_NAME) {
        Some(c) => c.values.as_i64(),
        None => ds.dim_len(PRESSURE_DIM_NAME).map(|n| (0..n as i64).collect()),
    }
}

/// Extract each variable with a pressure dimension at each of `targets`.
///
/// The output variable for `var` at `target` is named `{var}{target}` and
/// holds the slice at the nearest available level, without the pressure
/// dimension. A [`Diagnostic::nearest_level`] is recorded whenever the
/// nearest level is not exactly the target. If `ds` has no pressure
/// dimension, or no variable uses it, the result is an empty dataset.
pub fn extract_pressure_levels(
    ds: &GriddedDataset,
    targets: &[i64],
    diags: &mut Diagnostics,
) -> error_stack::Result<GriddedDataset, PrepError> {
    let mut out = GriddedDataset::new();
    let Some(levels) = level_values(ds) else {
        return Ok(out);
    };

    let pressure_vars = ds
        .data_vars()
        .filter(|(_, v)| v.has_dim(PRESSURE_DIM_NAME));

    for (varname, var) in pressure_vars {
        for &target in targets {
            let Some(idx) = nearest_level_index(&levels, target) else {
                continue;
            };
            let actual = levels[idx];
            if actual != target {
                diags.push(Diagnostic::nearest_level(varname, target, actual));
            }

            let Some(level_var) = var.index_dim(PRESSURE_DIM_NAME, idx) else {
                continue;
            };
            for dim in level_var.dims() {
                if out.coord(dim).is_none() {
                    if let Some(c) = ds.coord(dim) {
                        out.insert_coord(dim.as_str(), c.clone())
                            .attach_printable_lazy(|| format!("copying coordinate '{dim}'"))?;
                    }
                }
            }
            let name = format!("{varname}{target}");
            out.insert_var(name.as_str(), level_var)
                .attach_printable_lazy(|| format!("adding level variable '{name}'"))?;
        }
    }

    log::debug!(
        "Extracted {} single-level variables from {} levels",
        out.num_vars(),
        levels.len()
    );
    Ok(out)
}
