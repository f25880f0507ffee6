//! Testing utilities for bulk loading jobs.
//!
//! This module provides what the crate's own tests use, for end-users writing
//! tests around their row producers and table specs:
//!
//! - **Test doubles**: an encoder factory that records calls instead of writing
//!   files, and a producer wrapper that counts pulls
//! - **Fixtures**: a sample schema, write statement and row set
//! - **Mock I/O**: scratch directories for output trees
//!
//! # Quick Start
//!
//! ```
//! use bulkloader::policy::CollectingSink;
//! use bulkloader::testing::*;
//! use bulkloader::TableWriter;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = TempDirPath::new()?;
//! let factory = RecordingEncoderFactory::new().fail_on_row(3);
//! let log = factory.log();
//! let sink = CollectingSink::new();
//!
//! let writer = TableWriter::with_parts(
//!     sample_spec(dir.path())?,
//!     SAMPLE_INSERT,
//!     factory,
//!     Arc::new(sink.clone()),
//! )?;
//! let report = writer.generate(sample_rows(5))?;
//!
//! assert_eq!(report.rows_written, 4);
//! assert_eq!(log.closes(), 1);
//! assert_eq!(sink.row_failures().len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod builders;
pub mod fixtures;
pub mod mock_io;

pub use builders::*;
pub use fixtures::*;
pub use mock_io::*;
