//! Schema file resolution.
//!
//! The schema file is read whole and handed to the encoder as opaque text;
//! compiling it is the encoder's job.

use crate::error::{LoaderError, LoaderResult};
use std::fs;
use std::io;
use std::path::Path;

/// Read the schema definition at `path` without interpreting it.
///
/// # Errors
/// [`LoaderError::SchemaUnavailable`] when the path does not exist, is not a
/// regular file, or does not hold UTF-8 text.
pub fn read_schema(path: impl AsRef<Path>) -> LoaderResult<String> {
    let path = path.as_ref();
    let unavailable = |source: io::Error| LoaderError::SchemaUnavailable {
        path: path.to_path_buf(),
        source,
    };

    let meta = fs::metadata(path).map_err(unavailable)?;
    if !meta.is_file() {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("schema file {} is not a regular file", path.display()),
        )));
    }
    fs::read_to_string(path).map_err(unavailable)
}
