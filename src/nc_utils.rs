//! Reading and writing [`GriddedDataset`]s as netCDF files.
use std::path::Path;

use error_stack::ResultExt;
use ndarray::{Array1, ArrayD, Ix1};
use netcdf::{
    types::{FloatType, IntType, NcVariableType},
    AttributeValue, Extents,
};

use crate::{
    dataset::{AttrValue, Attributes, CoordValues, Coordinate, DataVariable, GriddedDataset},
    error::PrepError,
    io::{DatasetReader, DatasetWriter},
    nctime::{
        datetime_to_epoch_seconds, nctimes_to_datetimes, TimeUnits, OUTPUT_CALENDAR,
        OUTPUT_TIME_UNITS,
    },
};

/// Attributes that describe how values are stored on disk. They are consumed
/// when a variable is unpacked on read and not carried into the dataset.
const PACKING_ATTRIBUTES: [&str; 5] = [
    "_FillValue",
    "missing_value",
    "scale_factor",
    "add_offset",
    "coordinates",
];

/// Numeric data read from a netCDF variable, widened to 64 bits.
///
/// Created with [`NcNumeric::get_from`], which accepts any integer or
/// floating point netCDF type.
pub enum NcNumeric {
    Int(ArrayD<i64>),
    Float(ArrayD<f64>),
}

impl NcNumeric {
    /// Read all data from a netCDF variable. Returns `Ok(None)` for non-numeric
    /// types (strings, chars, compound, opaque, enum, and variable length types).
    pub fn get_from(var: &netcdf::Variable) -> netcdf::Result<Option<Self>> {
        let values = match var.vartype() {
            NcVariableType::Int(IntType::I8) => {
                Self::Int(var.get::<i8, _>(Extents::All)?.mapv(i64::from))
            }
            NcVariableType::Int(IntType::I16) => {
                Self::Int(var.get::<i16, _>(Extents::All)?.mapv(i64::from))
            }
            NcVariableType::Int(IntType::I32) => {
                Self::Int(var.get::<i32, _>(Extents::All)?.mapv(i64::from))
            }
            NcVariableType::Int(IntType::I64) => Self::Int(var.get::<i64, _>(Extents::All)?),
            NcVariableType::Int(IntType::U8) => {
                Self::Int(var.get::<u8, _>(Extents::All)?.mapv(i64::from))
            }
            NcVariableType::Int(IntType::U16) => {
                Self::Int(var.get::<u16, _>(Extents::All)?.mapv(i64::from))
            }
            NcVariableType::Int(IntType::U32) => {
                Self::Int(var.get::<u32, _>(Extents::All)?.mapv(i64::from))
            }
            NcVariableType::Int(IntType::U64) => {
                Self::Int(var.get::<u64, _>(Extents::All)?.mapv(|v| v as i64))
            }
            NcVariableType::Float(FloatType::F32) => {
                Self::Float(var.get::<f32, _>(Extents::All)?.mapv(f64::from))
            }
            NcVariableType::Float(FloatType::F64) => Self::Float(var.get::<f64, _>(Extents::All)?),
            _ => return Ok(None),
        };
        Ok(Some(values))
    }

    pub fn into_f64(self) -> ArrayD<f64> {
        match self {
            NcNumeric::Int(arr) => arr.mapv(|v| v as f64),
            NcNumeric::Float(arr) => arr,
        }
    }
}

/// Convert a netCDF attribute value; returns `None` for types with no
/// [`AttrValue`] equivalent.
pub fn attr_from_nc(value: AttributeValue) -> Option<AttrValue> {
    let v = match value {
        AttributeValue::Str(s) => AttrValue::Str(s),
        AttributeValue::Strs(s) => AttrValue::Str(s.join("\n")),
        AttributeValue::Schar(v) => AttrValue::Int(v.into()),
        AttributeValue::Uchar(v) => AttrValue::Int(v.into()),
        AttributeValue::Short(v) => AttrValue::Int(v.into()),
        AttributeValue::Ushort(v) => AttrValue::Int(v.into()),
        AttributeValue::Int(v) => AttrValue::Int(v.into()),
        AttributeValue::Uint(v) => AttrValue::Int(v.into()),
        AttributeValue::Longlong(v) => AttrValue::Int(v),
        AttributeValue::Ulonglong(v) => AttrValue::Int(v as i64),
        AttributeValue::Float(v) => AttrValue::Float(v.into()),
        AttributeValue::Double(v) => AttrValue::Float(v),
        AttributeValue::Schars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Uchars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Shorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Ushorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Ints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Uints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        AttributeValue::Longlongs(v) => AttrValue::Ints(v),
        AttributeValue::Ulonglongs(v) => AttrValue::Ints(v.into_iter().map(|x| x as i64).collect()),
        AttributeValue::Floats(v) => AttrValue::Floats(v.into_iter().map(f64::from).collect()),
        AttributeValue::Doubles(v) => AttrValue::Floats(v),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(v)
}

pub fn attr_to_nc(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Str(s) => AttributeValue::Str(s.clone()),
        AttrValue::Int(i) => AttributeValue::Longlong(*i),
        AttrValue::Float(f) => AttributeValue::Double(*f),
        AttrValue::Ints(v) => AttributeValue::Longlongs(v.clone()),
        AttrValue::Floats(v) => AttributeValue::Doubles(v.clone()),
    }
}

fn read_attributes<'a, I: Iterator<Item = netcdf::Attribute<'a>>>(
    attrs: I,
) -> netcdf::Result<Attributes> {
    let mut out = Attributes::new();
    for attr in attrs {
        let name = attr.name().to_string();
        match attr_from_nc(attr.value()?) {
            Some(v) => {
                out.insert(name, v);
            }
            None => log::debug!("Skipping attribute '{name}' with unsupported type"),
        }
    }
    Ok(out)
}

/// Apply `_FillValue`/`missing_value` masking and `scale_factor`/`add_offset`
/// unpacking, consuming those attributes.
fn unpack(raw: NcNumeric, attrs: &mut Attributes) -> ArrayD<f64> {
    let fills = fill_values(attrs);
    let scale = attrs
        .get("scale_factor")
        .and_then(AttrValue::as_f64)
        .unwrap_or(1.0);
    let offset = attrs
        .get("add_offset")
        .and_then(AttrValue::as_f64)
        .unwrap_or(0.0);
    for a in PACKING_ATTRIBUTES {
        attrs.shift_remove(a);
    }

    raw.into_f64().mapv(|v| {
        if v.is_nan() || fills.contains(&v) {
            f64::NAN
        } else {
            v * scale + offset
        }
    })
}

fn fill_values(attrs: &Attributes) -> Vec<f64> {
    ["_FillValue", "missing_value"]
        .iter()
        .filter_map(|a| attrs.get(*a).and_then(AttrValue::as_f64))
        .collect()
}

/// Number of values that are NaN or equal to one of `fills`.
fn count_missing(raw: &NcNumeric, fills: &[f64]) -> usize {
    let is_missing = |v: f64| v.is_nan() || fills.contains(&v);
    match raw {
        NcNumeric::Int(arr) => arr.iter().filter(|v| is_missing(**v as f64)).count(),
        NcNumeric::Float(arr) => arr.iter().filter(|v| is_missing(**v)).count(),
    }
}

fn into_1d<T>(name: &str, arr: ArrayD<T>) -> error_stack::Result<Array1<T>, PrepError> {
    let ndim = arr.ndim();
    arr.into_dimensionality::<Ix1>()
        .change_context(PrepError::ShapeMismatch { ndim: 1, shape_len: ndim })
        .attach_printable_lazy(|| format!("coordinate '{name}' must be one-dimensional"))
}

fn read_coordinate(
    name: &str,
    raw: NcNumeric,
    mut attrs: Attributes,
) -> error_stack::Result<Coordinate, PrepError> {
    // A coordinate label cannot be missing, so fill values are rejected
    // rather than masked.
    let n_missing = count_missing(&raw, &fill_values(&attrs));
    if n_missing > 0 {
        return Err(PrepError::MissingCoordinateValues {
            name: name.to_string(),
            count: n_missing,
        }
        .into());
    }
    attrs.shift_remove("_FillValue");
    attrs.shift_remove("missing_value");

    let time_units = attrs
        .get("units")
        .and_then(AttrValue::as_str)
        .filter(|u| TimeUnits::parse(u).is_some())
        .map(|u| u.to_string());

    let values = match (raw, time_units) {
        (raw, Some(units)) => {
            let raw = into_1d(name, raw.into_f64())?;
            let times = nctimes_to_datetimes(raw.iter().copied(), &units)
                .attach_printable_lazy(|| format!("decoding time coordinate '{name}'"))?;
            attrs.shift_remove("units");
            attrs.shift_remove("calendar");
            CoordValues::Time(times)
        }
        (NcNumeric::Int(arr), None) => CoordValues::Int(into_1d(name, arr)?),
        (NcNumeric::Float(arr), None) => CoordValues::Float(into_1d(name, arr)?),
    };

    Ok(Coordinate { values, attrs })
}

/// Load every numeric variable of `file` into memory.
///
/// One-dimensional variables named after their own dimension become
/// coordinates; everything else becomes a data variable.
pub fn read_dataset(
    file: &netcdf::File,
    path: &Path,
) -> error_stack::Result<GriddedDataset, PrepError> {
    let mut ds = GriddedDataset::new();
    ds.attrs = read_attributes(file.attributes())
        .change_context_lazy(|| PrepError::ReadingInput(path.to_path_buf()))?;

    let mut data_vars = vec![];
    for var in file.variables() {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let raw = NcNumeric::get_from(&var)
            .change_context_lazy(|| PrepError::ReadingInput(path.to_path_buf()))
            .attach_printable_lazy(|| format!("reading variable '{name}'"))?;
        let Some(raw) = raw else {
            log::debug!("Skipping non-numeric variable '{name}'");
            continue;
        };
        let attrs = read_attributes(var.attributes())
            .change_context_lazy(|| PrepError::ReadingInput(path.to_path_buf()))
            .attach_printable_lazy(|| format!("reading attributes of '{name}'"))?;

        if dims.len() == 1 && dims[0] == name {
            let coord = read_coordinate(&name, raw, attrs)?;
            ds.insert_coord(name.as_str(), coord)?;
        } else {
            data_vars.push((name, dims, raw, attrs));
        }
    }

    for (name, dims, raw, mut attrs) in data_vars {
        let data = unpack(raw, &mut attrs);
        let mut var = DataVariable::new(dims.as_slice(), data)
            .attach_printable_lazy(|| format!("variable '{name}'"))?;
        var.attrs = attrs;
        ds.insert_var(name.as_str(), var)?;
    }

    Ok(ds)
}

/// Write all dimensions, coordinates, and variables of `ds` into `file`.
///
/// Time coordinates are encoded as 64-bit integer [`OUTPUT_TIME_UNITS`];
/// data variables are written as doubles with missing values as NaN.
pub fn write_dataset(file: &mut netcdf::FileMut, ds: &GriddedDataset) -> netcdf::Result<()> {
    for (name, len) in ds.dims() {
        file.add_dimension(&name, len)?;
    }

    for (name, value) in ds.attrs.iter() {
        file.add_attribute(name, attr_to_nc(value))?;
    }

    for (name, coord) in ds.coords() {
        match &coord.values {
            CoordValues::Float(arr) => {
                let mut var = file.add_variable::<f64>(name, &[name.as_str()])?;
                put_attributes(&mut var, &coord.attrs)?;
                var.put(arr.view().into_dyn(), Extents::All)?;
            }
            CoordValues::Int(arr) => {
                let mut var = file.add_variable::<i64>(name, &[name.as_str()])?;
                put_attributes(&mut var, &coord.attrs)?;
                var.put(arr.view().into_dyn(), Extents::All)?;
            }
            CoordValues::Time(times) => {
                let secs: Array1<i64> = times.iter().map(datetime_to_epoch_seconds).collect();
                let mut var = file.add_variable::<i64>(name, &[name.as_str()])?;
                put_attributes(&mut var, &coord.attrs)?;
                var.put_attribute("units", OUTPUT_TIME_UNITS)?;
                var.put_attribute("calendar", OUTPUT_CALENDAR)?;
                var.put(secs.view().into_dyn(), Extents::All)?;
            }
        }
    }

    for (name, data_var) in ds.data_vars() {
        let dims: Vec<&str> = data_var.dims().iter().map(|d| d.as_str()).collect();
        let mut var = file.add_variable::<f64>(name, &dims)?;
        put_attributes(&mut var, &data_var.attrs)?;
        var.put(data_var.data.view(), Extents::All)?;
    }

    Ok(())
}

fn put_attributes(var: &mut netcdf::VariableMut, attrs: &Attributes) -> netcdf::Result<()> {
    for (name, value) in attrs.iter() {
        var.put_attribute(name, attr_to_nc(value))?;
    }
    Ok(())
}

/// [`DatasetReader`] and [`DatasetWriter`] backed by netCDF files.
#[derive(Debug, Default, Clone, Copy)]
pub struct NcDatasetIo;

impl DatasetReader for NcDatasetIo {
    fn read(&self, path: &Path) -> error_stack::Result<GriddedDataset, PrepError> {
        let file = netcdf::open(path)
            .change_context_lazy(|| PrepError::ReadingInput(path.to_path_buf()))?;
        let ds = read_dataset(&file, path);
        // the handle is closed here whether or not reading succeeded
        drop(file);
        ds
    }
}

impl DatasetWriter for NcDatasetIo {
    fn extension(&self) -> &str {
        "nc"
    }

    fn write(&self, ds: &GriddedDataset, path: &Path) -> error_stack::Result<(), PrepError> {
        let mut file = netcdf::create(path)
            .change_context_lazy(|| PrepError::WritingOutput(path.to_path_buf()))?;
        write_dataset(&mut file, ds)
            .change_context_lazy(|| PrepError::WritingOutput(path.to_path_buf()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{hourly_times, pressure_dataset};
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use rstest::rstest;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("levels.nc");
        let times = hourly_times("2023-01-31T22:00:00", 3);
        let ds = pressure_dataset(&times, &[1000.0, 850.0], &["r"]);

        NcDatasetIo.write(&ds, &path).unwrap();
        let back = NcDatasetIo.read(&path).unwrap();

        assert_eq!(
            back.coord("valid_time").unwrap().values.as_times().unwrap(),
            times.as_slice()
        );
        assert_eq!(back.dim_len("pressure_level"), Some(2));
        let r = back.data_var("r").unwrap();
        assert_eq!(r.dims(), ds.data_var("r").unwrap().dims());
        assert_eq!(r.data, ds.data_var("r").unwrap().data);
        assert_eq!(r.attrs.get("units").and_then(AttrValue::as_str), Some("%"));
    }

    #[test]
    fn test_read_packed_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packed.nc");
        {
            let mut f = netcdf::create(&path).unwrap();
            f.add_dimension("valid_time", 2).unwrap();
            f.add_dimension("latitude", 1).unwrap();
            f.add_dimension("longitude", 2).unwrap();

            {
                let mut t = f.add_variable::<i64>("valid_time", &["valid_time"]).unwrap();
                t.put_attribute("units", "hours since 2023-01-01").unwrap();
                t.put(Array1::from(vec![0i64, 1]).view().into_dyn(), Extents::All)
                    .unwrap();
            }

            let mut v = f
                .add_variable::<i16>("t2m", &["valid_time", "latitude", "longitude"])
                .unwrap();
            v.put_attribute("scale_factor", 0.5f64).unwrap();
            v.put_attribute("add_offset", 273.0f64).unwrap();
            v.put_attribute("missing_value", -32767i16).unwrap();
            v.put_attribute("units", "K").unwrap();
            let raw = Array3::from_shape_vec((2, 1, 2), vec![0i16, 10, -32767, 20]).unwrap();
            v.put(raw.view().into_dyn(), Extents::All).unwrap();
        }

        let ds = NcDatasetIo.read(&path).unwrap();
        let times = ds.coord("valid_time").unwrap().values.as_times().unwrap();
        assert_eq!(times, hourly_times("2023-01-01T00:00:00", 2).as_slice());

        let t2m = ds.data_var("t2m").unwrap();
        let vals: Vec<f64> = t2m.data.iter().copied().collect();
        assert_abs_diff_eq!(vals[0], 273.0);
        assert_abs_diff_eq!(vals[1], 278.0);
        assert!(vals[2].is_nan());
        assert_abs_diff_eq!(vals[3], 283.0);
        assert!(t2m.attrs.get("scale_factor").is_none());
        assert!(t2m.attrs.get("missing_value").is_none());
        assert_eq!(t2m.attrs.get("units"), Some(&AttrValue::from("K")));
    }

    #[rstest]
    #[case(vec![0, i64::MIN], Some(i64::MIN))]
    #[case(vec![0, -1], Some(-1))]
    fn test_time_coordinate_with_fill_value(
        #[case] raw_times: Vec<i64>,
        #[case] fill: Option<i64>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nat.nc");
        {
            let mut f = netcdf::create(&path).unwrap();
            f.add_dimension("valid_time", raw_times.len()).unwrap();
            let mut t = f.add_variable::<i64>("valid_time", &["valid_time"]).unwrap();
            t.put_attribute("units", "milliseconds since 1970-01-01").unwrap();
            if let Some(fill) = fill {
                t.put_attribute("_FillValue", fill).unwrap();
            }
            t.put(Array1::from(raw_times).view().into_dyn(), Extents::All)
                .unwrap();
        }

        let err = NcDatasetIo.read(&path).unwrap_err();
        match err.current_context() {
            PrepError::MissingCoordinateValues { name, count } => {
                assert_eq!(name, "valid_time");
                assert_eq!(*count, 1);
            }
            other => panic!("Expected MissingCoordinateValues, got {other:?}"),
        }
    }

    #[test]
    fn test_undecodable_time_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.nc");
        {
            let mut f = netcdf::create(&path).unwrap();
            f.add_dimension("valid_time", 1).unwrap();
            let mut t = f.add_variable::<i64>("valid_time", &["valid_time"]).unwrap();
            t.put_attribute("units", "milliseconds since 1970-01-01").unwrap();
            t.put(Array1::from(vec![i64::MIN]).view().into_dyn(), Extents::All)
                .unwrap();
        }

        let err = NcDatasetIo.read(&path).unwrap_err();
        assert!(matches!(err.current_context(), PrepError::BadTimeUnits(_)));
    }

    #[test]
    fn test_subsecond_times_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subsec.nc");
        let t: chrono::NaiveDateTime = "2023-01-31T23:59:59.900".parse().unwrap();
        let mut ds = GriddedDataset::new();
        ds.insert_coord(
            "valid_time",
            Coordinate::new(CoordValues::Time(vec![t])),
        )
        .unwrap();

        NcDatasetIo.write(&ds, &path).unwrap();
        let back = NcDatasetIo.read(&path).unwrap();
        let times = back.coord("valid_time").unwrap().values.as_times().unwrap();
        assert_eq!(times, &["2023-01-31T23:59:59".parse::<chrono::NaiveDateTime>().unwrap()]);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = NcDatasetIo.read(&dir.path().join("nope.nc")).unwrap_err();
        assert!(matches!(err.current_context(), PrepError::ReadingInput(_)));
    }
}
