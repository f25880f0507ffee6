//! Error taxonomy for table generation.
//!
//! Setup failures (spec, directory, schema, encoder construction) are fatal for a
//! table and surface before any row is pulled from the producer. Row failures are
//! normally absorbed by the recovery policy and only surface here when the policy
//! decides to abort. Finalization failures are reported through the
//! [`WriteReport`](crate::WriteReport) instead of being returned.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the job-level API.
pub type LoaderResult<T> = Result<T, LoaderError>;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// The table spec is incomplete or names something that cannot be laid out on disk.
    #[error("invalid table spec: {reason}")]
    InvalidSpec { reason: String },

    /// The `root/keyspace/table` directory could not be created.
    #[error("unable to create directory {}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The schema file is missing or unreadable.
    #[error("unable to read schema at {}", path.display())]
    SchemaUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Schema, statement, partitioner and directory could not be bound into an encoder.
    #[error("unable to construct encoder for {table}")]
    EncoderConstructionFailed {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// A row failed to encode and the recovery policy is fail-fast.
    #[error("unable to write row #{row} into {table}")]
    RowEncodingFailed {
        table: String,
        row: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A buffered segment could not be written and the recovery policy is fail-fast.
    #[error("unable to write segment generation {generation} of {table}, {rows} rows lost")]
    SegmentWriteFailed {
        table: String,
        generation: u32,
        rows: u64,
        #[source]
        source: anyhow::Error,
    },

    /// More rows or segments failed than the recovery policy tolerates.
    #[error("{table}: {failures} failures, aborting")]
    FailureLimitExceeded { table: String, failures: u64 },

    /// The row producer itself failed while being drained.
    #[error("row producer for {table} failed after {row} rows")]
    ProducerFailed {
        table: String,
        row: u64,
        #[source]
        source: anyhow::Error,
    },

    /// Closing the encoder failed. Only returned by APIs that finalize explicitly;
    /// [`TableWriter::generate`](crate::TableWriter::generate) records it in the report.
    #[error("unable to finalize output for {table}")]
    FinalizationFailed {
        table: String,
        #[source]
        source: anyhow::Error,
    },
}

impl LoaderError {
    pub(crate) fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    /// Whether the error happened before any row was handed to the encoder.
    #[must_use]
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidSpec { .. }
                | Self::DirectoryCreationFailed { .. }
                | Self::SchemaUnavailable { .. }
                | Self::EncoderConstructionFailed { .. }
        )
    }
}
