use crate::dataset::{AttrValue, GriddedDataset};

/// An affine unit conversion (`new = old * scale + offset`) applied to a
/// fixed set of variables.
#[derive(Debug, Clone, Copy)]
pub struct UnitConversion {
    pub variables: &'static [&'static str],
    pub scale: f64,
    pub offset: f64,
    pub unit: &'static str,
}

/// Kelvin to degrees Celsius for the 2 m temperature and dew point.
pub const KELVIN_TO_CELSIUS: UnitConversion = UnitConversion {
    variables: &["t2m", "d2m"],
    scale: 1.0,
    offset: -273.15,
    unit: "C",
};

/// Meters per second to kilometers per hour for the 10 m wind components.
pub const MPS_TO_KPH: UnitConversion = UnitConversion {
    variables: &["u10", "v10"],
    scale: 3.6,
    offset: 0.0,
    unit: "km/h",
};

pub const STANDARD_CONVERSIONS: [UnitConversion; 2] = [KELVIN_TO_CELSIUS, MPS_TO_KPH];

/// Both attributes are set so tools reading either one agree.
pub const UNIT_ATTRIBUTES: [&str; 2] = ["units", "GRIB_units"];

/// Convert temperatures to Celsius and winds to km/h.
///
/// Returns a converted copy; `ds` itself is not modified. Variables that
/// are not present are skipped. This does not check the current units, so
/// converting an already converted dataset converts it again.
pub fn apply_unit_conversions(ds: &GriddedDataset) -> GriddedDataset {
    apply_conversions(ds, &STANDARD_CONVERSIONS)
}

pub fn apply_conversions(ds: &GriddedDataset, conversions: &[UnitConversion]) -> GriddedDataset {
    let mut out = ds.clone();
    for conv in conversions {
        for &varname in conv.variables {
            let Some(var) = out.data_var_mut(varname) else {
                continue;
            };
            var.data.mapv_inplace(|v| v * conv.scale + conv.offset);
            for attr in UNIT_ATTRIBUTES {
                var.attrs.insert(attr.to_string(), AttrValue::from(conv.unit));
            }
            log::debug!("Converted {varname} to {}", conv.unit);
        }
    }
    out
}
