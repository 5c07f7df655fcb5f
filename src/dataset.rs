//! In-memory representation of a gridded dataset.
//!
//! A [`GriddedDataset`] is a collection of named [`DataVariable`]s that share
//! named, one-dimensional [`Coordinate`]s. It does not depend on
//! the netCDF library: files are fully read into this structure (see
//! [`crate::nc_utils`]) so that no dataset ever refers back to an open file.
//!
//! Operations that reshape a dataset ([`GriddedDataset::select`],
//! [`GriddedDataset::subset_vars`], [`align_inner`], [`merge_override`]) all
//! return new values and leave their inputs untouched.
use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, Axis};

use crate::error::PrepError;

/// An attribute value on a dataset, coordinate, or variable.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Return a scalar numeric attribute as a float; `None` for strings and arrays.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            AttrValue::Ints(v) if v.len() == 1 => Some(v[0] as f64),
            AttrValue::Floats(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

pub type Attributes = IndexMap<String, AttrValue>;

/// The values along one coordinate axis.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordValues {
    Float(Array1<f64>),
    Int(Array1<i64>),
    Time(Vec<NaiveDateTime>),
}

/// Hashable form of a single coordinate label, used to intersect axes.
/// Integer and float labels compare by numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CoordKey {
    Number(u64),
    Time(NaiveDateTime),
}

impl CoordKey {
    fn number(v: f64) -> Self {
        // -0.0 and 0.0 must be the same label
        let v = if v == 0.0 { 0.0 } else { v };
        Self::Number(v.to_bits())
    }
}

impl CoordValues {
    pub fn len(&self) -> usize {
        match self {
            CoordValues::Float(v) => v.len(),
            CoordValues::Int(v) => v.len(),
            CoordValues::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_time(&self) -> bool {
        matches!(self, Self::Time(_))
    }

    pub fn as_times(&self) -> Option<&[NaiveDateTime]> {
        if let Self::Time(t) = self {
            Some(t)
        } else {
            None
        }
    }

    /// Numeric labels truncated toward zero, or `None` for a time axis.
    pub fn as_i64(&self) -> Option<Vec<i64>> {
        match self {
            CoordValues::Float(v) => Some(v.iter().map(|x| *x as i64).collect()),
            CoordValues::Int(v) => Some(v.to_vec()),
            CoordValues::Time(_) => None,
        }
    }

    fn keys(&self) -> Vec<CoordKey> {
        match self {
            CoordValues::Float(v) => v.iter().map(|x| CoordKey::number(*x)).collect(),
            CoordValues::Int(v) => v.iter().map(|x| CoordKey::number(*x as f64)).collect(),
            CoordValues::Time(v) => v.iter().map(|t| CoordKey::Time(*t)).collect(),
        }
    }

    /// Take the labels at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            CoordValues::Float(v) => Self::Float(indices.iter().map(|&i| v[i]).collect()),
            CoordValues::Int(v) => Self::Int(indices.iter().map(|&i| v[i]).collect()),
            CoordValues::Time(v) => Self::Time(indices.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// A one-dimensional coordinate axis. Its dimension has the same name
/// as the coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub values: CoordValues,
    pub attrs: Attributes,
}

impl Coordinate {
    pub fn new(values: CoordValues) -> Self {
        Self {
            values,
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr<V: Into<AttrValue>>(mut self, name: &str, value: V) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A named N-dimensional array of values along named dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct DataVariable {
    dims: Vec<String>,
    pub data: ArrayD<f64>,
    pub attrs: Attributes,
}

impl DataVariable {
    /// Create a variable, checking that there is one dimension name per data axis.
    pub fn new<S: ToString>(dims: &[S], data: ArrayD<f64>) -> Result<Self, PrepError> {
        if dims.len() != data.ndim() {
            return Err(PrepError::ShapeMismatch {
                ndim: dims.len(),
                shape_len: data.ndim(),
            });
        }
        Ok(Self {
            dims: dims.iter().map(|d| d.to_string()).collect(),
            data,
            attrs: Attributes::new(),
        })
    }

    pub fn with_attr<V: Into<AttrValue>>(mut self, name: &str, value: V) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// Index of `dim` among this variable's axes.
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.axis_of(dim).is_some()
    }

    /// Length of `dim` in this variable, if it uses that dimension.
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|i| self.data.len_of(Axis(i)))
    }

    /// Take the elements at `indices` along `dim`. Variables without `dim` are
    /// returned unchanged.
    pub fn select(&self, dim: &str, indices: &[usize]) -> Self {
        match self.axis_of(dim) {
            Some(ax) => Self {
                dims: self.dims.clone(),
                data: self.data.select(Axis(ax), indices),
                attrs: self.attrs.clone(),
            },
            None => self.clone(),
        }
    }

    /// Slice at `index` along `dim`, removing that dimension. Returns `None`
    /// if the variable does not have `dim`.
    pub fn index_dim(&self, dim: &str, index: usize) -> Option<Self> {
        let ax = self.axis_of(dim)?;
        let dims = self
            .dims
            .iter()
            .filter(|d| d.as_str() != dim)
            .cloned()
            .collect();
        Some(Self {
            dims,
            data: self.data.index_axis(Axis(ax), index).to_owned(),
            attrs: self.attrs.clone(),
        })
    }

    fn rename_dim(&mut self, old: &str, new: &str) {
        for d in self.dims.iter_mut() {
            if d == old {
                *d = new.to_string();
            }
        }
    }
}

/// A labelled collection of variables sharing coordinate axes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GriddedDataset {
    coords: IndexMap<String, Coordinate>,
    data_vars: IndexMap<String, DataVariable>,
    pub attrs: Attributes,
}

impl GriddedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the dataset has neither coordinates nor data variables.
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty() && self.data_vars.is_empty()
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.get(name)
    }

    pub fn coord_mut(&mut self, name: &str) -> Option<&mut Coordinate> {
        self.coords.get_mut(name)
    }

    pub fn coords(&self) -> impl Iterator<Item = (&String, &Coordinate)> {
        self.coords.iter()
    }

    pub fn coord_names(&self) -> impl Iterator<Item = &str> {
        self.coords.keys().map(|k| k.as_str())
    }

    pub fn data_var(&self, name: &str) -> Option<&DataVariable> {
        self.data_vars.get(name)
    }

    pub(crate) fn data_var_mut(&mut self, name: &str) -> Option<&mut DataVariable> {
        self.data_vars.get_mut(name)
    }

    pub fn data_vars(&self) -> impl Iterator<Item = (&String, &DataVariable)> {
        self.data_vars.iter()
    }

    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.data_vars.keys().map(|k| k.as_str())
    }

    pub fn contains_var(&self, name: &str) -> bool {
        self.data_vars.contains_key(name)
    }

    pub fn num_vars(&self) -> usize {
        self.data_vars.len()
    }

    /// Length of dimension `dim`, taken from its coordinate if present or
    /// else from the first variable that uses it.
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        if let Some(c) = self.coords.get(dim) {
            return Some(c.len());
        }
        self.data_vars.values().find_map(|v| v.dim_len(dim))
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dim_len(dim).is_some()
    }

    /// All dimensions with their lengths, coordinates first.
    pub fn dims(&self) -> IndexMap<String, usize> {
        let mut dims: IndexMap<String, usize> = self
            .coords
            .iter()
            .map(|(name, c)| (name.clone(), c.len()))
            .collect();
        for var in self.data_vars.values() {
            for (ax, dim) in var.dims.iter().enumerate() {
                dims.entry(dim.clone())
                    .or_insert_with(|| var.data.len_of(Axis(ax)));
            }
        }
        dims
    }

    /// Add or replace a coordinate. Fails if a data variable already uses
    /// that dimension with a different length.
    pub fn insert_coord<S: Into<String>>(
        &mut self,
        name: S,
        coord: Coordinate,
    ) -> Result<(), PrepError> {
        let name = name.into();
        if let Some(var_len) = self.data_vars.values().find_map(|v| v.dim_len(&name)) {
            if var_len != coord.len() {
                return Err(PrepError::DimensionMismatch {
                    dim: name.clone(),
                    name,
                    expected: var_len,
                    actual: coord.len(),
                });
            }
        }
        self.coords.insert(name, coord);
        Ok(())
    }

    /// Add or replace a data variable. Fails if any of its dimensions already
    /// exists in the dataset with a different length.
    pub fn insert_var<S: Into<String>>(
        &mut self,
        name: S,
        var: DataVariable,
    ) -> Result<(), PrepError> {
        let name = name.into();
        for (ax, dim) in var.dims.iter().enumerate() {
            let actual = var.data.len_of(Axis(ax));
            let existing = self.coords.get(dim).map(|c| c.len()).or_else(|| {
                self.data_vars
                    .iter()
                    .filter(|(n, _)| n.as_str() != name)
                    .find_map(|(_, v)| v.dim_len(dim))
            });
            if let Some(expected) = existing {
                if expected != actual {
                    return Err(PrepError::DimensionMismatch {
                        dim: dim.clone(),
                        name,
                        expected,
                        actual,
                    });
                }
            }
        }
        self.data_vars.insert(name, var);
        Ok(())
    }

    /// Rename dimension `old` to `new` in the coordinates and in every variable.
    pub fn rename_dim(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        self.coords = std::mem::take(&mut self.coords)
            .into_iter()
            .map(|(k, v)| if k == old { (new.to_string(), v) } else { (k, v) })
            .collect();
        for var in self.data_vars.values_mut() {
            var.rename_dim(old, new);
        }
    }

    /// New dataset with only the elements at `indices` along `dim`.
    pub fn select(&self, dim: &str, indices: &[usize]) -> GriddedDataset {
        let coords = self
            .coords
            .iter()
            .map(|(name, c)| {
                let c = if name == dim {
                    Coordinate {
                        values: c.values.select(indices),
                        attrs: c.attrs.clone(),
                    }
                } else {
                    c.clone()
                };
                (name.clone(), c)
            })
            .collect();
        let data_vars = self
            .data_vars
            .iter()
            .map(|(name, v)| (name.clone(), v.select(dim, indices)))
            .collect();
        GriddedDataset {
            coords,
            data_vars,
            attrs: self.attrs.clone(),
        }
    }

    /// New dataset with only the named variables (names not present are
    /// ignored) and the coordinates of the dimensions they use.
    pub fn subset_vars<S: AsRef<str>>(&self, names: &[S]) -> GriddedDataset {
        let data_vars: IndexMap<String, DataVariable> = names
            .iter()
            .filter_map(|n| {
                self.data_vars
                    .get(n.as_ref())
                    .map(|v| (n.as_ref().to_string(), v.clone()))
            })
            .collect();
        let used_dims: HashSet<&str> = data_vars
            .values()
            .flat_map(|v| v.dims.iter().map(|d| d.as_str()))
            .collect();
        let coords = self
            .coords
            .iter()
            .filter(|(name, _)| used_dims.contains(name.as_str()))
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect();
        GriddedDataset {
            coords,
            data_vars,
            attrs: self.attrs.clone(),
        }
    }
}

/// Restrict datasets to the labels they have in common.
///
/// For every coordinate present in at least two of the datasets, the labels
/// found in *all* datasets having that coordinate are kept, in the order of
/// the first dataset with it; every dataset with that coordinate is then
/// reindexed to exactly those labels. Coordinates held by only one dataset
/// are left alone.
pub fn align_inner(datasets: &[GriddedDataset]) -> Vec<GriddedDataset> {
    let mut shared: IndexMap<&str, usize> = IndexMap::new();
    for ds in datasets {
        for name in ds.coord_names() {
            *shared.entry(name).or_insert(0) += 1;
        }
    }

    let mut aligned = datasets.to_vec();
    for (dim, count) in shared {
        if count < 2 {
            continue;
        }

        let keyed: Vec<Option<Vec<CoordKey>>> = datasets
            .iter()
            .map(|ds| ds.coord(dim).map(|c| c.values.keys()))
            .collect();
        let mut present = keyed.iter().flatten();
        let Some(first) = present.next() else {
            continue;
        };
        let mut seen = HashSet::new();
        let mut common: Vec<CoordKey> = first
            .iter()
            .copied()
            .filter(|k| seen.insert(*k))
            .collect();
        for keys in present {
            let set: HashSet<CoordKey> = keys.iter().copied().collect();
            common.retain(|k| set.contains(k));
        }

        for (ds, keys) in aligned.iter_mut().zip(keyed.iter()) {
            let Some(keys) = keys else { continue };
            let mut positions: HashMap<CoordKey, usize> = HashMap::new();
            for (i, k) in keys.iter().enumerate() {
                positions.entry(*k).or_insert(i);
            }
            let indices: Vec<usize> = common.iter().map(|k| positions[k]).collect();
            if indices.len() != keys.len() || indices.iter().enumerate().any(|(i, j)| i != *j) {
                *ds = ds.select(dim, &indices);
            }
        }
    }
    aligned
}

/// Merge datasets into one. Later datasets override earlier ones when a
/// coordinate or variable name appears more than once; global attributes
/// are taken from the first dataset that defines each one.
pub fn merge_override<I: IntoIterator<Item = GriddedDataset>>(
    datasets: I,
) -> error_stack::Result<GriddedDataset, PrepError> {
    let mut merged = GriddedDataset::new();
    for (i, ds) in datasets.into_iter().enumerate() {
        for (name, value) in ds.attrs {
            merged.attrs.entry(name).or_insert(value);
        }
        for (name, coord) in ds.coords {
            merged
                .insert_coord(name.as_str(), coord)
                .attach_printable_lazy(|| format!("merging coordinate '{name}' from dataset {i}"))?;
        }
        for (name, var) in ds.data_vars {
            merged
                .insert_var(name.as_str(), var)
                .attach_printable_lazy(|| format!("merging variable '{name}' from dataset {i}"))?;
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{hourly_times, surface_dataset};
    use ndarray::IxDyn;

    #[test]
    fn test_variable_shape_checked() {
        let err = DataVariable::new(&["valid_time"], ArrayD::zeros(IxDyn(&[2, 3]))).unwrap_err();
        assert!(matches!(err, PrepError::ShapeMismatch { ndim: 1, shape_len: 2 }));
    }

    #[test]
    fn test_insert_var_dim_mismatch() {
        let mut ds = surface_dataset(&hourly_times("2023-01-01T00:00:00", 3), &[("t2m", 280.0)]);
        let bad = DataVariable::new(&["valid_time"], ArrayD::zeros(IxDyn(&[4]))).unwrap();
        let err = ds.insert_var("bad", bad).unwrap_err();
        match err {
            PrepError::DimensionMismatch { dim, expected, actual, .. } => {
                assert_eq!(dim, "valid_time");
                assert_eq!(expected, 3);
                assert_eq!(actual, 4);
            }
            other => panic!("Expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_rename_dim() {
        let mut ds = surface_dataset(&hourly_times("2023-01-01T00:00:00", 2), &[("t2m", 280.0)]);
        ds.rename_dim("valid_time", "time");
        assert!(ds.coord("time").is_some());
        assert!(ds.coord("valid_time").is_none());
        assert_eq!(ds.data_var("t2m").unwrap().dims()[0], "time");
        // coordinate order is preserved
        assert_eq!(ds.coord_names().next(), Some("time"));
    }

    #[test]
    fn test_select_and_subset() {
        let ds = surface_dataset(
            &hourly_times("2023-01-01T00:00:00", 4),
            &[("t2m", 280.0), ("u10", 3.0)],
        );
        let sub = ds.select("valid_time", &[1, 3]);
        assert_eq!(sub.dim_len("valid_time"), Some(2));
        assert_eq!(sub.data_var("t2m").unwrap().data.shape(), &[2, 2, 2]);
        // the original is untouched
        assert_eq!(ds.dim_len("valid_time"), Some(4));

        let only_u = ds.subset_vars(&["u10", "not_there"]);
        assert_eq!(only_u.var_names().collect::<Vec<_>>(), vec!["u10"]);
        assert!(only_u.coord("latitude").is_some());
    }

    #[test]
    fn test_align_inner_intersects_and_reorders() {
        let a = surface_dataset(&hourly_times("2023-01-01T00:00:00", 4), &[("a", 1.0)]);
        let b = surface_dataset(&hourly_times("2023-01-01T01:00:00", 4), &[("b", 2.0)]);
        let mut c = surface_dataset(&hourly_times("2023-01-01T00:00:00", 3), &[("c", 3.0)]);
        // reverse c's time axis so reindexing is required
        c = c.select("valid_time", &[2, 1, 0]);

        let aligned = align_inner(&[a, b, c]);
        let expected = hourly_times("2023-01-01T01:00:00", 2);
        for ds in aligned.iter() {
            let times = ds.coord("valid_time").unwrap().values.as_times().unwrap();
            assert_eq!(times, expected.as_slice());
        }
    }

    #[test]
    fn test_align_inner_numeric_labels() {
        let mut a = GriddedDataset::new();
        let lats = Array1::from(vec![-30.0, -30.25, -30.5]);
        a.insert_coord("latitude", Coordinate::new(CoordValues::Float(lats)))
            .unwrap();
        let mut b = GriddedDataset::new();
        b.insert_coord("latitude", Coordinate::new(CoordValues::Int(Array1::from(vec![-30, -31]))))
            .unwrap();
        let aligned = align_inner(&[a, b]);
        assert_eq!(aligned[0].dim_len("latitude"), Some(1));
        assert_eq!(aligned[1].dim_len("latitude"), Some(1));
    }

    #[test]
    fn test_merge_override_prefers_last() {
        let times = hourly_times("2023-01-01T00:00:00", 2);
        let a = surface_dataset(&times, &[("t2m", 1.0), ("sp", 1000.0)]);
        let b = surface_dataset(&times, &[("t2m", 2.0)]);
        let merged = merge_override([a, b]).unwrap();
        assert_eq!(merged.num_vars(), 2);
        assert!(merged.data_var("t2m").unwrap().data.iter().all(|v| *v == 2.0));
        assert!(merged.data_var("sp").unwrap().data.iter().all(|v| *v == 1000.0));
    }

    #[test]
    fn test_merge_length_conflict() {
        let a = surface_dataset(&hourly_times("2023-01-01T00:00:00", 2), &[("t2m", 1.0)]);
        let b = surface_dataset(&hourly_times("2023-01-01T00:00:00", 3), &[("u10", 2.0)]);
        let err = merge_override([a, b]).unwrap_err();
        assert!(matches!(err.current_context(), PrepError::DimensionMismatch { .. }));
    }
}
