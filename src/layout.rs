//! Output directory layout: `root/keyspace/table`.

use crate::error::{LoaderError, LoaderResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Join the table directory without touching the filesystem.
#[must_use]
pub fn table_directory(root: impl AsRef<Path>, keyspace: &str, table: &str) -> PathBuf {
    root.as_ref().join(keyspace).join(table)
}

/// Create `root/keyspace/table` and every missing parent.
///
/// A directory that already exists is not an error. Any segment of the path
/// that exists as something other than a directory is.
///
/// # Errors
/// [`LoaderError::DirectoryCreationFailed`] wrapping the underlying I/O cause.
pub fn ensure_table_directory(
    root: impl AsRef<Path>,
    keyspace: &str,
    table: &str,
) -> LoaderResult<PathBuf> {
    let dir = table_directory(root, keyspace, table);
    let failed = |source: io::Error| LoaderError::DirectoryCreationFailed {
        path: dir.clone(),
        source,
    };

    fs::create_dir_all(&dir).map_err(failed)?;
    if !dir.is_dir() {
        return Err(failed(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a directory", dir.display()),
        )));
    }
    tracing::debug!(directory = %dir.display(), "table directory ready");
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_nested_directories() {
        let root = TempDir::new().unwrap();
        let dir = ensure_table_directory(root.path().join("out"), "ks", "t").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, root.path().join("out").join("ks").join("t"));
    }

    #[test]
    fn existing_directory_is_success() {
        let root = TempDir::new().unwrap();
        let a = ensure_table_directory(root.path(), "ks", "t").unwrap();
        let b = ensure_table_directory(root.path(), "ks", "t").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn file_in_the_way_fails() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("ks"), b"not a dir").unwrap();
        let err = ensure_table_directory(root.path(), "ks", "t").unwrap_err();
        assert!(matches!(err, LoaderError::DirectoryCreationFailed { .. }));
    }

    #[test]
    fn file_at_leaf_fails() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("ks")).unwrap();
        fs::write(root.path().join("ks").join("t"), b"x").unwrap();
        assert!(matches!(
            ensure_table_directory(root.path(), "ks", "t"),
            Err(LoaderError::DirectoryCreationFailed { .. })
        ));
    }
}
