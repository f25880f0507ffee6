//! The storage-format encoder seam.
//!
//! A [`TableWriter`](crate::TableWriter) only ever talks to an [`Encoder`] built
//! by an [`EncoderFactory`]. The crate ships one implementation,
//! [`SegmentEncoder`], which compiles the table schema, binds the write
//! statement, orders rows by partitioner token and clustering key, and flushes
//! immutable segment generations whenever its buffer fills up.
//!
//! ```no_run
//! use bulkloader::encoder::{Encoder, EncoderConfig, EncoderFactory, SegmentEncoderFactory};
//! use bulkloader::Value;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = EncoderConfig {
//!     directory: "/data/out/shop/orders".into(),
//!     keyspace: "shop".into(),
//!     table: "orders".into(),
//!     schema: "CREATE TABLE shop.orders (id int PRIMARY KEY, total double)".into(),
//!     statement: "INSERT INTO shop.orders (id, total) VALUES (?, ?)".into(),
//!     buffer_bytes: 64 * 1024 * 1024,
//!     sorted: false,
//!     partitioner: "Murmur3Partitioner".into(),
//!     compression: None,
//! };
//! let mut encoder = SegmentEncoderFactory.build(&config)?;
//! encoder.append(&[Value::Int(1), Value::double(9.5)])?;
//! let segments = encoder.close()?;
//! # Ok(())
//! # }
//! ```

pub mod ddl;
pub mod format;
pub mod partitioner;
pub mod reader;
pub mod segment;
pub mod statement;

use crate::config::TableSpec;
use crate::row::Value;
use anyhow::Result;
use std::path::PathBuf;
use thiserror::Error;

pub use ddl::{ClusteringOrder, ColumnDef, CqlType, TableSchema};
pub use format::{Component, SegmentDescriptor, SegmentStatistics, StoredRow};
pub use partitioner::{Partitioner, Token};
pub use reader::SegmentReader;
pub use segment::{SegmentEncoder, SegmentEncoderFactory};
pub use statement::{InsertStatement, render_insert};

/// A stateful, single-use writer of one table's output files.
///
/// Not safe for concurrent use; a writer owns its encoder for its whole life.
pub trait Encoder {
    /// Append one row's values, positioned like the write statement's columns.
    fn append(&mut self, values: &[Value]) -> Result<()>;

    /// Flush buffered rows and finalize every segment written so far.
    ///
    /// Must be called exactly once; the encoder is unusable afterwards.
    fn close(&mut self) -> Result<Vec<SegmentDescriptor>>;
}

/// A buffered batch that could not be written out as a segment.
///
/// Every row in the batch was accepted by an earlier `append` and none of them
/// reached disk. Files of the failed generation are removed before this is
/// returned. Encoders report it from `append` (the row being appended is part of
/// the batch) or from `close`.
#[derive(Debug, Error)]
#[error("segment generation {generation} lost {rows} buffered rows")]
pub struct SegmentLost {
    pub generation: u32,
    /// Rows accepted since the last segment that was written.
    pub rows: u64,
    #[source]
    pub source: anyhow::Error,
}

/// Builds encoders bound to one table's configuration.
pub trait EncoderFactory: Send + Sync {
    type Encoder: Encoder;

    /// Check that `config` would produce a working encoder, without creating files.
    fn validate(&self, config: &EncoderConfig) -> Result<()>;

    fn build(&self, config: &EncoderConfig) -> Result<Self::Encoder>;
}

/// Everything an encoder is bound to at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Writable output directory, already created.
    pub directory: PathBuf,
    pub keyspace: String,
    pub table: String,
    /// Schema definition text, passed through unmodified.
    pub schema: String,
    /// Write statement text, passed through unmodified.
    pub statement: String,
    /// Buffered bytes that trigger a segment flush.
    pub buffer_bytes: usize,
    /// Rows arrive already in storage order.
    pub sorted: bool,
    pub partitioner: String,
    pub compression: Option<String>,
}

impl EncoderConfig {
    #[must_use]
    pub fn from_spec(
        spec: &TableSpec,
        directory: PathBuf,
        schema: String,
        statement: String,
    ) -> Self {
        Self {
            directory,
            keyspace: spec.keyspace.clone(),
            table: spec.table.clone(),
            schema,
            statement,
            buffer_bytes: spec.buffer_bytes(),
            sorted: spec.sorted,
            partitioner: spec.partitioner.clone(),
            compression: spec.compression.clone(),
        }
    }

    /// Override the flush threshold, mostly useful to force small segments.
    #[must_use]
    pub const fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = bytes;
        self
    }

    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }
}
