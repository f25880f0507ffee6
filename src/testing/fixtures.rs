//! Ready-made schemas, statements and row sets.
//!
//! The fixtures describe a small sensor table:
//!
//! ```text
//! CREATE TABLE metrics.readings (
//!     sensor text, at bigint, value double, unit text,
//!     PRIMARY KEY (sensor, at)
//! ) WITH CLUSTERING ORDER BY (at DESC)
//! ```

use crate::config::TableSpec;
use crate::row::{MappedRow, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const SAMPLE_KEYSPACE: &str = "metrics";
pub const SAMPLE_TABLE: &str = "readings";

pub const SAMPLE_SCHEMA: &str = "CREATE TABLE metrics.readings (
    sensor text,
    at bigint,
    value double,
    unit text,
    PRIMARY KEY (sensor, at)
) WITH CLUSTERING ORDER BY (at DESC);
";

pub const SAMPLE_INSERT: &str =
    "INSERT INTO metrics.readings (sensor, at, value, unit) VALUES (?, ?, ?, ?)";

/// A valid reading for sensor `s{i % 3}` at time `i`.
#[must_use]
pub fn sample_row(i: i64) -> MappedRow {
    MappedRow::typed(vec![
        Value::text(format!("s{}", i % 3)),
        Value::BigInt(1_700_000_000_000 + i),
        Value::double(i as f64 * 0.5),
        Value::text("celsius"),
    ])
}

/// `n` valid readings.
#[must_use]
pub fn sample_rows(n: usize) -> Vec<MappedRow> {
    (0..n as i64).map(sample_row).collect()
}

/// A row the encoder must reject: text where the timestamp column expects `bigint`.
#[must_use]
pub fn malformed_row() -> MappedRow {
    MappedRow::typed(vec![
        Value::text("s0"),
        Value::text("yesterday"),
        Value::double(1.0),
        Value::text("celsius"),
    ])
}

/// Write `schema` to `dir/schema.cql` and return the path.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_schema(dir: impl AsRef<Path>, schema: &str) -> io::Result<PathBuf> {
    let path = dir.as_ref().join("schema.cql");
    fs::write(&path, schema)?;
    Ok(path)
}

/// Spec for the sample table with its schema file written under `root`.
///
/// Output goes to `root/out`.
///
/// # Errors
///
/// Returns an error if the schema file cannot be written.
pub fn sample_spec(root: impl AsRef<Path>) -> io::Result<TableSpec> {
    let root = root.as_ref();
    let schema = write_schema(root, SAMPLE_SCHEMA)?;
    Ok(TableSpec::new(
        root.join("out"),
        SAMPLE_KEYSPACE,
        SAMPLE_TABLE,
        schema,
    ))
}
