//! The seam between the processing steps and the files they read and write.
use std::path::Path;

use crate::{dataset::GriddedDataset, error::PrepError};

/// Something that can load a [`GriddedDataset`] from a path.
///
/// Implementations must fully materialize the dataset and release any file
/// handle before returning, on success and on error alike. The returned
/// dataset must not depend on the source file staying open.
pub trait DatasetReader {
    fn read(&self, path: &Path) -> error_stack::Result<GriddedDataset, PrepError>;
}

/// Something that can persist a [`GriddedDataset`] as a self-contained file.
pub trait DatasetWriter {
    /// File extension (without the dot) for files this writer produces.
    fn extension(&self) -> &str;

    /// Write `ds` to `path`. The parent directory is expected to exist.
    fn write(&self, ds: &GriddedDataset, path: &Path) -> error_stack::Result<(), PrepError>;
}
