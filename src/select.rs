use crate::{
    dataset::GriddedDataset,
    diagnostics::{Diagnostic, Diagnostics},
    error::PrepError,
};

/// Keep only the requested variables that exist in `ds`.
///
/// Requested names that are absent are reported together in a single
/// [`Diagnostic::missing_variables`]. If none of the requested names are
/// present, this fails with [`PrepError::NoVariablesPresent`].
pub fn select_variables<S: AsRef<str>>(
    ds: &GriddedDataset,
    requested: &[S],
    diags: &mut Diagnostics,
) -> Result<GriddedDataset, PrepError> {
    let (present, missing): (Vec<&str>, Vec<&str>) = requested
        .iter()
        .map(|v| v.as_ref())
        .partition(|v| ds.contains_var(v));

    if !missing.is_empty() {
        diags.push(Diagnostic::missing_variables(missing.as_slice()));
    }

    if present.is_empty() {
        return Err(PrepError::NoVariablesPresent {
            requested: requested.iter().map(|v| v.as_ref().to_string()).collect(),
        });
    }

    Ok(ds.subset_vars(present.as_slice()))
}
