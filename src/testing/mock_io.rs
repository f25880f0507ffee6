//! Scratch filesystem helpers for writer tests.
//!
//! Output trees are built under temporary directories that are removed on
//! drop, so tests can create, inspect and break directory layouts freely.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory that is automatically deleted when dropped.
pub struct TempDirPath {
    #[allow(dead_code)]
    temp_dir: TempDir,
    path: PathBuf,
}

impl TempDirPath {
    /// Create a new temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().to_path_buf();
        Ok(Self { temp_dir, path })
    }

    /// Get the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a file path within this directory.
    #[must_use]
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }

    /// Place a regular file at `relative`, creating its parents.
    ///
    /// Used to put a non-directory in the way of an output tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn touch(&self, relative: impl AsRef<Path>) -> io::Result<PathBuf> {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, b"")?;
        Ok(path)
    }
}

impl Default for TempDirPath {
    fn default() -> Self {
        Self::new().expect("Failed to create temporary directory")
    }
}

/// File names directly under `dir`, sorted.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
///
/// # Example
///
/// ```
/// use bulkloader::testing::{TempDirPath, list_files};
///
/// let dir = TempDirPath::new().unwrap();
/// dir.touch("b.txt").unwrap();
/// dir.touch("a.txt").unwrap();
/// assert_eq!(list_files(dir.path()).unwrap(), vec!["a.txt", "b.txt"]);
/// ```
pub fn list_files(dir: impl AsRef<Path>) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
