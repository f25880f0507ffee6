//! # Bulkloader
//!
//! Offline conversion of mapped rows into a wide-column store's immutable table
//! files, for bulk population of a cluster without going through its write path.
//!
//! ## Key Features
//!
//! - **Per-table writers** - one directory, one schema, one write statement, one encoder
//! - **Setup strictness** - spec, directory, schema and encoder are all checked before any row is pulled
//! - **Row resilience** - a malformed row is reported and skipped; the rest of the stream still lands
//! - **Pluggable encoder** - the [`encoder::Encoder`] seam ships with a segment encoder and can be stubbed in tests
//! - **Injected diagnostics** - failures go to a [`policy::DiagnosticSink`], not a global logger
//! - **Multi-table jobs** - independent tables run concurrently with the `parallel-io` feature
//! - **Compression** - gzip, zstd, bzip2 and xz for segment data (all optional via feature flags)
//!
//! ## Quick Start
//!
//! ```no_run
//! use bulkloader::*;
//!
//! # fn main() -> Result<(), LoaderError> {
//! let spec = TableSpec::new("/data/out", "shop", "orders", "/data/schema/orders.cql")
//!     .with_buffer_size(64)
//!     .with_compression("zstd");
//! let statement = render_insert("shop", "orders", &["id", "customer", "total"]);
//!
//! let rows = vec![
//!     MappedRow::typed(vec![Value::Int(1), Value::text("ada"), Value::double(12.5)]),
//!     MappedRow::empty(),
//!     MappedRow::typed(vec![Value::Int(2), Value::text("grace"), Value::double(7.0)]),
//! ];
//!
//! let report = TableWriter::new(spec, statement)?.generate(rows)?;
//! assert_eq!(report.rows_empty, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### TableSpec
//!
//! A [`TableSpec`] names the output root, keyspace, table, schema file, buffer
//! size, sortedness and partitioner of one table. Files land in
//! `output_dir/keyspace/table`.
//!
//! ### TableWriter
//!
//! A [`TableWriter`] is built from a spec and a write statement. Construction
//! creates the output directory, reads the schema and checks that the encoder
//! accepts schema, statement and partitioner. [`TableWriter::generate`] then
//! drains a row iterator and closes the encoder exactly once, on every exit path.
//!
//! ### Failures
//!
//! Setup errors are fatal and returned as [`LoaderError`]. Row errors are
//! handed to the sink and, under the default [`policy::RecoveryPolicy`],
//! skipped. A failure while finalizing is reported and recorded in the
//! [`WriteReport`] without failing the call.
//!
//! ## Feature Flags
//!
//! - `parallel-io` - run independent table jobs on a rayon pool
//! - `compression-gzip`, `compression-zstd`, `compression-bzip2`, `compression-xz` - segment data codecs

pub mod config;
pub mod encoder;
pub mod error;
pub mod io;
pub mod layout;
pub mod loader;
pub mod policy;
pub mod row;
pub mod schema;
pub mod testing;
pub mod writer;

pub use config::TableSpec;
pub use encoder::{Encoder, EncoderFactory, SegmentEncoderFactory, SegmentReader, render_insert};
pub use error::{LoaderError, LoaderResult};
pub use layout::{ensure_table_directory, table_directory};
pub use loader::{ExecMode, JobRunner, TableJob, run_jobs};
pub use policy::{CollectingSink, DiagnosticSink, RecoveryMode, RecoveryPolicy, TracingSink};
pub use row::{MappedRow, Value};
pub use schema::read_schema;
pub use writer::{TableWriter, WriteReport};
