//! Columnar file I/O.

pub mod csv_export;
pub mod parquet;

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;

pub use self::csv_export::export_csv;
pub use self::parquet::{ParquetSink, ParquetSource};

/// Temporary file in the directory of `dest`, so that persisting it is a
/// same-filesystem rename.
pub(crate) fn temp_beside(dest: &Path) -> Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(NamedTempFile::new_in(dir)?)
}
