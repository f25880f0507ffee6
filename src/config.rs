//! Per-table job configuration.
//!
//! A [`TableSpec`] is built once per loading job, usually from JSON, and is
//! treated as immutable afterwards.
//!
//! ```
//! use bulkloader::TableSpec;
//!
//! let spec = TableSpec::from_json_str(r#"{
//!     "output_dir": "/tmp/out",
//!     "keyspace": "shop",
//!     "table": "orders",
//!     "schema": "/tmp/orders.cql",
//!     "buffer_size": 64,
//!     "partitioner": "Murmur3Partitioner"
//! }"#).unwrap();
//!
//! assert!(!spec.sorted);
//! assert_eq!(spec.qualified_name(), "shop.orders");
//! ```

use crate::error::{LoaderError, LoaderResult};
use crate::policy::RecoveryPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bytes per megabyte of encoder buffer.
pub const MB: usize = 1024 * 1024;

/// Everything needed to generate the segment files of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Root of the output tree; files land in `output_dir/keyspace/table`.
    pub output_dir: PathBuf,
    pub keyspace: String,
    pub table: String,
    /// Path to a file holding the table's `CREATE TABLE` statement.
    pub schema: PathBuf,
    /// Encoder buffer in megabytes before a segment is flushed.
    pub buffer_size: usize,
    /// Rows are guaranteed to arrive in storage order.
    #[serde(default)]
    pub sorted: bool,
    /// Must match the target cluster's partitioner exactly.
    pub partitioner: String,
    /// Optional codec name applied to segment data files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(default)]
    pub recovery: RecoveryPolicy,
}

impl TableSpec {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        schema: impl Into<PathBuf>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            keyspace: keyspace.into(),
            table: table.into(),
            schema: schema.into(),
            buffer_size: 128,
            sorted: false,
            partitioner: "Murmur3Partitioner".to_string(),
            compression: None,
            recovery: RecoveryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_buffer_size(mut self, megabytes: usize) -> Self {
        self.buffer_size = megabytes;
        self
    }

    #[must_use]
    pub const fn with_sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    #[must_use]
    pub fn with_partitioner(mut self, partitioner: impl Into<String>) -> Self {
        self.partitioner = partitioner.into();
        self
    }

    #[must_use]
    pub fn with_compression(mut self, codec: impl Into<String>) -> Self {
        self.compression = Some(codec.into());
        self
    }

    #[must_use]
    pub const fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Parse a spec from JSON and validate it.
    pub fn from_json_str(json: &str) -> LoaderResult<Self> {
        let spec: Self = serde_json::from_str(json)
            .map_err(|e| LoaderError::invalid_spec(format!("malformed table spec: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read, parse and validate a JSON spec file.
    pub fn from_json_file(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))
            .map_err(|e| LoaderError::invalid_spec(format!("{e:#}")))?;
        Self::from_json_str(&json)
    }

    /// `keyspace.table`, as used in logs and reports.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    /// Encoder buffer size in bytes.
    #[must_use]
    pub const fn buffer_bytes(&self) -> usize {
        self.buffer_size.saturating_mul(MB)
    }

    /// Check the fields that must hold before anything touches the filesystem.
    pub fn validate(&self) -> LoaderResult<()> {
        check_identifier("keyspace", &self.keyspace)?;
        check_identifier("table", &self.table)?;
        if self.output_dir.as_os_str().is_empty() {
            return Err(LoaderError::invalid_spec("output_dir must not be empty"));
        }
        if self.schema.as_os_str().is_empty() {
            return Err(LoaderError::invalid_spec("schema path must not be empty"));
        }
        if self.buffer_size == 0 {
            return Err(LoaderError::invalid_spec("buffer_size must be at least 1 MB"));
        }
        if self.partitioner.trim().is_empty() {
            return Err(LoaderError::invalid_spec("partitioner must not be empty"));
        }
        Ok(())
    }
}

// Identifiers become directory names, so only plain word characters are allowed.
// They must also match the compiled schema, which folds unquoted names to lowercase.
fn check_identifier(what: &str, name: &str) -> LoaderResult<()> {
    if name.is_empty() {
        return Err(LoaderError::invalid_spec(format!("{what} must not be empty")));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(LoaderError::invalid_spec(format!(
            "{what} '{name}' may only contain letters, digits and underscores"
        )));
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(LoaderError::invalid_spec(format!(
            "{what} '{name}' must be lowercase, as stored by the schema"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RecoveryMode;

    fn spec() -> TableSpec {
        TableSpec::new("/tmp/out", "ks", "events", "/tmp/schema.cql")
    }

    #[test]
    fn defaults_are_valid() {
        assert!(spec().validate().is_ok());
        assert_eq!(spec().buffer_bytes(), 128 * MB);
    }

    #[test]
    fn rejects_path_like_identifiers() {
        let mut s = spec();
        s.table = "../escape".into();
        assert!(matches!(s.validate(), Err(LoaderError::InvalidSpec { .. })));

        let mut s = spec();
        s.keyspace = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_mixed_case_identifiers() {
        let mut s = spec();
        s.keyspace = "Metrics".into();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("must be lowercase"), "{err}");
    }

    #[test]
    fn rejects_zero_buffer() {
        assert!(spec().with_buffer_size(0).validate().is_err());
    }

    #[test]
    fn json_requires_partitioner_and_buffer() {
        let missing = r#"{"output_dir":"o","keyspace":"k","table":"t","schema":"s"}"#;
        assert!(TableSpec::from_json_str(missing).is_err());

        let full = r#"{"output_dir":"o","keyspace":"k","table":"t","schema":"s",
            "buffer_size":8,"partitioner":"ByteOrderedPartitioner","sorted":true,
            "compression":"zstd","recovery":{"mode":"fail_fast"}}"#;
        let s = TableSpec::from_json_str(full).unwrap();
        assert!(s.sorted);
        assert_eq!(s.compression.as_deref(), Some("zstd"));
        assert_eq!(s.recovery.mode, RecoveryMode::FailFast);
    }
}
