//! Running several tables in one loading job.
//!
//! Each [`TableJob`] gets its own [`TableWriter`]; writers share nothing but the
//! diagnostic sink. Two jobs aimed at the same output directory are rejected
//! before anything runs.

use crate::config::TableSpec;
use crate::encoder::{EncoderFactory, SegmentEncoderFactory};
use crate::error::{LoaderError, LoaderResult};
use crate::layout::table_directory;
use crate::policy::{DiagnosticSink, TracingSink};
use crate::row::MappedRow;
use crate::writer::{TableWriter, WriteReport};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Row producer handed to a job.
pub type RowSource = Box<dyn Iterator<Item = MappedRow> + Send>;

/// One table to generate.
pub struct TableJob {
    pub spec: TableSpec,
    pub statement: String,
    pub rows: RowSource,
}

impl TableJob {
    pub fn new<I>(spec: TableSpec, statement: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = MappedRow>,
        I::IntoIter: Send + 'static,
    {
        Self {
            spec,
            statement: statement.into(),
            rows: Box::new(rows.into_iter()),
        }
    }

    fn run<F: EncoderFactory + Clone>(
        self,
        factory: F,
        sink: Arc<dyn DiagnosticSink>,
    ) -> LoaderResult<WriteReport> {
        let table = self.spec.qualified_name();
        let result = TableWriter::with_parts(self.spec, self.statement, factory, sink)
            .and_then(|writer| writer.generate(self.rows));
        if let Err(err) = &result {
            tracing::error!(table = %table, error = %err, "table job failed");
        }
        result
    }
}

impl fmt::Debug for TableJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableJob")
            .field("spec", &self.spec)
            .field("statement", &self.statement)
            .finish_non_exhaustive()
    }
}

/// How jobs are scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// One table after another on the calling thread.
    Sequential,
    /// Tables run concurrently on a rayon pool; `None` means one thread per CPU.
    #[cfg(feature = "parallel-io")]
    Parallel { threads: Option<usize> },
}

#[cfg(feature = "parallel-io")]
impl Default for ExecMode {
    fn default() -> Self {
        Self::Parallel { threads: None }
    }
}

#[cfg(not(feature = "parallel-io"))]
impl Default for ExecMode {
    fn default() -> Self {
        Self::Sequential
    }
}

/// Runs table jobs with a shared encoder factory and diagnostic sink.
pub struct JobRunner<F: EncoderFactory + Clone = SegmentEncoderFactory> {
    pub mode: ExecMode,
    factory: F,
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::with_parts(SegmentEncoderFactory, Arc::new(TracingSink))
    }
}

impl JobRunner {
    /// Segment encoder, `tracing` diagnostics, default scheduling.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: EncoderFactory + Clone> JobRunner<F> {
    pub fn with_parts(factory: F, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            mode: ExecMode::default(),
            factory,
            sink,
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run every job and return one result per job, in job order.
    ///
    /// # Errors
    /// `InvalidSpec` if two jobs resolve to the same output directory; no job is
    /// started in that case. Per-table failures are returned in the result list.
    pub fn run(&self, jobs: Vec<TableJob>) -> LoaderResult<Vec<LoaderResult<WriteReport>>> {
        check_distinct_directories(&jobs)?;
        tracing::info!(jobs = jobs.len(), mode = ?self.mode, "starting table jobs");

        match self.mode {
            ExecMode::Sequential => Ok(self.run_sequential(jobs)),
            #[cfg(feature = "parallel-io")]
            ExecMode::Parallel { threads } => Ok(self.run_parallel(jobs, threads)),
        }
    }

    fn run_sequential(&self, jobs: Vec<TableJob>) -> Vec<LoaderResult<WriteReport>> {
        jobs.into_iter()
            .map(|job| job.run(self.factory.clone(), Arc::clone(&self.sink)))
            .collect()
    }

    #[cfg(feature = "parallel-io")]
    fn run_parallel(
        &self,
        jobs: Vec<TableJob>,
        threads: Option<usize>,
    ) -> Vec<LoaderResult<WriteReport>> {
        use rayon::prelude::*;

        let threads = threads
            .unwrap_or_else(num_cpus::get)
            .clamp(1, jobs.len().max(1));
        let pool = match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool,
            Err(err) => {
                tracing::warn!(error = %err, "thread pool unavailable, running tables sequentially");
                return self.run_sequential(jobs);
            }
        };
        pool.install(|| {
            jobs.into_par_iter()
                .map(|job| job.run(self.factory.clone(), Arc::clone(&self.sink)))
                .collect()
        })
    }
}

/// Run `jobs` with the segment encoder and default scheduling.
///
/// # Errors
/// See [`JobRunner::run`].
pub fn run_jobs(
    jobs: Vec<TableJob>,
    sink: Arc<dyn DiagnosticSink>,
) -> LoaderResult<Vec<LoaderResult<WriteReport>>> {
    JobRunner::with_parts(SegmentEncoderFactory, sink).run(jobs)
}

fn check_distinct_directories(jobs: &[TableJob]) -> LoaderResult<()> {
    let mut seen = HashSet::new();
    for job in jobs {
        let dir = table_directory(&job.spec.output_dir, &job.spec.keyspace, &job.spec.table);
        if !seen.insert(dir.clone()) {
            return Err(LoaderError::invalid_spec(format!(
                "more than one job writes to {}",
                dir.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CollectingSink;
    use crate::testing::{RecordingEncoderFactory, TempDirPath, sample_rows, sample_spec};

    #[test]
    fn duplicate_targets_start_nothing() {
        let dir = TempDirPath::new().unwrap();
        let spec = sample_spec(dir.path()).unwrap();
        let factory = RecordingEncoderFactory::new();
        let log = factory.log();
        let runner = JobRunner::with_parts(factory, Arc::new(CollectingSink::new()));

        let jobs = vec![
            TableJob::new(spec.clone(), "INSERT", sample_rows(1)),
            TableJob::new(spec, "INSERT", sample_rows(1)),
        ];
        assert!(matches!(
            runner.run(jobs),
            Err(LoaderError::InvalidSpec { .. })
        ));
        assert_eq!(log.validations(), 0);
        assert!(!dir.file_path("out").exists());
    }

    #[test]
    fn sequential_results_follow_job_order() {
        let dir = TempDirPath::new().unwrap();
        let good = sample_spec(dir.path()).unwrap();
        let mut bad = good.clone();
        bad.table = "other".into();
        bad.schema = dir.file_path("missing.cql");

        let runner = JobRunner::with_parts(
            RecordingEncoderFactory::new(),
            Arc::new(CollectingSink::new()),
        )
        .with_mode(ExecMode::Sequential);
        let results = runner
            .run(vec![
                TableJob::new(bad, "INSERT", sample_rows(2)),
                TableJob::new(good, "INSERT", sample_rows(3)),
            ])
            .unwrap();

        assert!(matches!(
            results[0],
            Err(LoaderError::SchemaUnavailable { .. })
        ));
        assert_eq!(results[1].as_ref().unwrap().rows_written, 3);
    }
}
