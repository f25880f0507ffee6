//! Table writer: drives one table's row stream through an encoder.
//!
//! Construction does every fallible setup step up front (spec validation, output
//! directory, schema file, encoder validation), so a writer that exists is known
//! to be able to build its encoder. [`TableWriter::generate`] then pulls rows one
//! at a time, appends them in arrival order and closes the encoder exactly once.
//!
//! ```no_run
//! use bulkloader::{MappedRow, TableSpec, TableWriter, Value};
//!
//! # fn main() -> Result<(), bulkloader::LoaderError> {
//! let spec = TableSpec::new("/data/out", "shop", "orders", "/data/schema/orders.cql");
//! let writer = TableWriter::new(spec, "INSERT INTO shop.orders (id, total) VALUES (?, ?)")?;
//! let rows = (0..1000).map(|i| MappedRow::typed(vec![Value::Int(i), Value::double(9.5)]));
//! let report = writer.generate(rows)?;
//! println!("{} rows written, {} skipped", report.rows_written, report.rows_failed);
//! # Ok(())
//! # }
//! ```

use crate::config::TableSpec;
use crate::encoder::{
    Encoder, EncoderConfig, EncoderFactory, SegmentDescriptor, SegmentEncoderFactory, SegmentLost,
};
use crate::error::{LoaderError, LoaderResult};
use crate::layout::ensure_table_directory;
use crate::policy::{Decision, Diagnostic, DiagnosticSink, RowFailure, TracingSink};
use crate::row::{MappedRow, Value};
use crate::schema::read_schema;
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one table's generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// `keyspace.table`
    pub table: String,
    pub directory: PathBuf,
    /// Rows pulled from the producer, empty ones included.
    pub rows_read: u64,
    /// Rows without values, skipped silently.
    pub rows_empty: u64,
    /// Rows accepted by the encoder, minus those lost with a failed segment.
    pub rows_written: u64,
    pub rows_failed: u64,
    /// Accepted rows that never reached disk because their segment failed.
    pub rows_lost: u64,
    pub segments: Vec<SegmentDescriptor>,
    /// Set when closing the encoder failed; rows may be missing from the output.
    pub finalization_error: Option<String>,
}

impl WriteReport {
    /// No row failed or was lost and the output was finalized.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.rows_failed == 0 && self.rows_lost == 0 && self.finalization_error.is_none()
    }

    fn discount_lost(&mut self, rows: u64) {
        self.rows_written = self.rows_written.saturating_sub(rows);
        self.rows_lost += rows;
    }
}

/// Writer for one table's output directory.
pub struct TableWriter<F: EncoderFactory = SegmentEncoderFactory> {
    spec: TableSpec,
    config: EncoderConfig,
    factory: F,
    sink: Arc<dyn DiagnosticSink>,
}

impl TableWriter {
    /// Writer using the segment encoder and reporting failures through `tracing`.
    pub fn new(spec: TableSpec, statement: impl Into<String>) -> LoaderResult<Self> {
        Self::with_parts(spec, statement, SegmentEncoderFactory, Arc::new(TracingSink))
    }
}

impl<F: EncoderFactory> TableWriter<F> {
    /// Writer with an explicit encoder factory and diagnostic sink.
    ///
    /// # Errors
    /// `InvalidSpec`, `DirectoryCreationFailed`, `SchemaUnavailable` or
    /// `EncoderConstructionFailed`, checked in that order. Nothing after a failed
    /// step runs.
    pub fn with_parts(
        spec: TableSpec,
        statement: impl Into<String>,
        factory: F,
        sink: Arc<dyn DiagnosticSink>,
    ) -> LoaderResult<Self> {
        spec.validate()?;
        let directory = ensure_table_directory(&spec.output_dir, &spec.keyspace, &spec.table)?;
        let schema = read_schema(&spec.schema)?;
        let config = EncoderConfig::from_spec(&spec, directory, schema, statement.into());
        factory
            .validate(&config)
            .map_err(|source| LoaderError::EncoderConstructionFailed {
                table: spec.qualified_name(),
                source,
            })?;

        tracing::debug!(
            table = %spec.qualified_name(),
            directory = %config.directory.display(),
            "table writer ready"
        );
        Ok(Self {
            spec,
            config,
            factory,
            sink,
        })
    }

    #[must_use]
    pub const fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Output directory, created at construction.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    #[must_use]
    pub fn statement(&self) -> &str {
        &self.config.statement
    }

    /// Configuration the encoder will be built from.
    #[must_use]
    pub const fn encoder_config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Drain `rows` into the encoder and finalize the output.
    ///
    /// Empty rows are skipped. A row the encoder rejects is reported to the sink
    /// and, under the default policy, the stream carries on.
    ///
    /// # Errors
    /// `EncoderConstructionFailed` if the encoder cannot be built (no row is
    /// pulled in that case), or the policy's abort error. A failure while closing
    /// is not an error: it is reported to the sink and recorded in the report.
    pub fn generate<I>(self, rows: I) -> LoaderResult<WriteReport>
    where
        I: IntoIterator<Item = MappedRow>,
    {
        self.try_generate(rows.into_iter().map(Ok))
    }

    /// Like [`generate`](Self::generate) for a producer that can fail.
    ///
    /// A producer error stops the stream with `ProducerFailed`; rows appended
    /// before it are still finalized.
    pub fn try_generate<I>(self, rows: I) -> LoaderResult<WriteReport>
    where
        I: IntoIterator<Item = anyhow::Result<MappedRow>>,
    {
        let table = self.spec.qualified_name();
        let encoder = self
            .factory
            .build(&self.config)
            .map_err(|source| LoaderError::EncoderConstructionFailed {
                table: table.clone(),
                source,
            })?;
        let mut guard = EncoderGuard {
            encoder: Some(encoder),
            table: &table,
            sink: self.sink.as_ref(),
        };

        let mut report = WriteReport {
            table: table.clone(),
            directory: self.config.directory.clone(),
            ..WriteReport::default()
        };
        let mut outcome = Ok(());
        let mut position = 0u64;
        let mut failures = 0u64;

        for item in rows {
            position += 1;
            let row = match item {
                Ok(row) => row,
                Err(source) => {
                    outcome = Err(LoaderError::ProducerFailed {
                        table: table.clone(),
                        row: position,
                        source,
                    });
                    break;
                }
            };
            report.rows_read += 1;
            if !row.has_values() {
                report.rows_empty += 1;
                continue;
            }

            let appended = if row.is_consistent() {
                guard.append(row.values())
            } else {
                Err(anyhow!(
                    "row carries {} values but {} type descriptors",
                    row.values().len(),
                    row.types.len()
                ))
            };
            let err = match appended {
                Ok(()) => {
                    report.rows_written += 1;
                    continue;
                }
                Err(err) => err,
            };
            failures += 1;

            // A lost segment includes the row being appended.
            let lost = err
                .downcast_ref::<SegmentLost>()
                .map(|lost| (lost.generation, lost.rows));
            match lost {
                Some((generation, lost_rows)) => {
                    report.rows_written += 1;
                    report.discount_lost(lost_rows);
                    self.sink.report(&Diagnostic::SegmentLost {
                        table: table.clone(),
                        generation,
                        rows: lost_rows,
                        message: format!("{err:#}"),
                    });
                }
                None => {
                    report.rows_failed += 1;
                    self.sink.report(&Diagnostic::RowFailed(self.failure(
                        &table, position, row, &err,
                    )));
                }
            }

            match self.spec.recovery.decide(failures) {
                Decision::Continue => {}
                Decision::Abort => {
                    outcome = Err(match lost {
                        Some((generation, lost_rows)) => LoaderError::SegmentWriteFailed {
                            table: table.clone(),
                            generation,
                            rows: lost_rows,
                            source: err,
                        },
                        None => LoaderError::RowEncodingFailed {
                            table: table.clone(),
                            row: position,
                            source: err,
                        },
                    });
                    break;
                }
                Decision::LimitExceeded => {
                    outcome = Err(LoaderError::FailureLimitExceeded {
                        table: table.clone(),
                        failures,
                    });
                    break;
                }
            }
        }

        match guard.finish() {
            Ok(segments) => report.segments = segments,
            Err(err) => {
                let message = format!("{err:#}");
                if let Some(lost) = err.downcast_ref::<SegmentLost>() {
                    report.discount_lost(lost.rows);
                    self.sink.report(&Diagnostic::SegmentLost {
                        table: table.clone(),
                        generation: lost.generation,
                        rows: lost.rows,
                        message: message.clone(),
                    });
                }
                self.sink.report(&Diagnostic::FinalizationFailed {
                    table: table.clone(),
                    message: message.clone(),
                });
                report.finalization_error = Some(message);
            }
        }

        tracing::info!(
            table = %table,
            rows_read = report.rows_read,
            rows_written = report.rows_written,
            rows_failed = report.rows_failed,
            rows_lost = report.rows_lost,
            segments = report.segments.len(),
            "table generation finished"
        );
        outcome.map(|()| report)
    }

    fn failure(&self, table: &str, row: u64, mapped: MappedRow, err: &anyhow::Error) -> RowFailure {
        let values: Vec<Value> = mapped.values.unwrap_or_default();
        RowFailure {
            table: table.to_string(),
            row,
            values,
            types: mapped.types,
            statement: self.config.statement.clone(),
            message: format!("{err:#}"),
        }
    }
}

/// Owns the encoder for the streaming phase and closes it exactly once.
struct EncoderGuard<'a, E: Encoder> {
    encoder: Option<E>,
    table: &'a str,
    sink: &'a dyn DiagnosticSink,
}

impl<E: Encoder> EncoderGuard<'_, E> {
    fn append(&mut self, values: &[Value]) -> anyhow::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.append(values),
            None => Err(anyhow!("encoder for {} is already closed", self.table)),
        }
    }

    fn finish(mut self) -> anyhow::Result<Vec<SegmentDescriptor>> {
        match self.encoder.take() {
            Some(mut encoder) => encoder.close(),
            None => Ok(Vec::new()),
        }
    }
}

impl<E: Encoder> Drop for EncoderGuard<'_, E> {
    fn drop(&mut self) {
        let Some(mut encoder) = self.encoder.take() else {
            return;
        };
        tracing::warn!(table = %self.table, "closing encoder on an abnormal exit path");
        if let Err(err) = encoder.close() {
            self.sink.report(&Diagnostic::FinalizationFailed {
                table: self.table.to_string(),
                message: format!("{err:#}"),
            });
        }
    }
}
