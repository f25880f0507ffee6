use bulkloader::policy::CollectingSink;
use bulkloader::testing::*;
use bulkloader::{ExecMode, JobRunner, LoaderError, SegmentReader, TableJob, render_insert, run_jobs};
use std::sync::Arc;

fn job_for(dir: &TempDirPath, table: &str, rows: usize) -> TableJob {
    let schema = SAMPLE_SCHEMA.replace(SAMPLE_TABLE, table);
    let schema_path = dir.file_path(&format!("{table}.cql"));
    std::fs::write(&schema_path, schema).unwrap();
    let mut spec = sample_spec(dir.path()).unwrap();
    spec.table = table.to_string();
    spec.schema = schema_path;
    let statement = render_insert(SAMPLE_KEYSPACE, table, &["sensor", "at", "value", "unit"]);
    TableJob::new(spec, statement, sample_rows(rows))
}

#[test]
fn tables_run_independently_and_report_in_order() {
    let dir = TempDirPath::new().unwrap();
    let sink = CollectingSink::new();
    let jobs = vec![
        job_for(&dir, "hourly", 12),
        job_for(&dir, "daily", 5),
        job_for(&dir, "weekly", 0),
    ];

    let results = run_jobs(jobs, Arc::new(sink.clone())).unwrap();

    let written: Vec<u64> = results
        .iter()
        .map(|r| r.as_ref().unwrap().rows_written)
        .collect();
    assert_eq!(written, vec![12, 5, 0]);
    assert!(sink.is_empty());

    for (table, rows) in [("hourly", 12), ("daily", 5)] {
        let reader = SegmentReader::new(
            dir.file_path("out").join(SAMPLE_KEYSPACE).join(table),
            SAMPLE_KEYSPACE,
            table,
        );
        assert_eq!(reader.read_all().unwrap().len(), rows);
    }
}

#[test]
fn one_failing_table_does_not_stop_the_others() {
    let dir = TempDirPath::new().unwrap();
    let mut broken = job_for(&dir, "broken", 3);
    broken.statement = "INSERT INTO metrics.broken (sensor) VALUES (?)".into();

    let runner = JobRunner::new().with_mode(ExecMode::Sequential);
    let results = runner
        .run(vec![broken, job_for(&dir, "fine", 3)])
        .unwrap();

    assert!(matches!(
        results[0],
        Err(LoaderError::EncoderConstructionFailed { .. })
    ));
    assert_eq!(results[1].as_ref().unwrap().rows_written, 3);
}

#[test]
fn same_directory_twice_is_rejected() {
    let dir = TempDirPath::new().unwrap();
    let err = run_jobs(
        vec![job_for(&dir, "dup", 1), job_for(&dir, "dup", 1)],
        Arc::new(CollectingSink::new()),
    )
    .unwrap_err();
    assert!(matches!(err, LoaderError::InvalidSpec { .. }));
}

#[cfg(feature = "parallel-io")]
#[test]
fn parallel_mode_matches_sequential_results() {
    let dir = TempDirPath::new().unwrap();
    let jobs = (0..4).map(|i| job_for(&dir, &format!("t{i}"), 10 + i)).collect();

    let runner = JobRunner::with_parts(RecordingEncoderFactory::new(), Arc::new(CollectingSink::new()))
        .with_mode(ExecMode::Parallel { threads: Some(2) });
    let results = runner.run(jobs).unwrap();

    let written: Vec<u64> = results
        .into_iter()
        .map(|r| r.unwrap().rows_written)
        .collect();
    assert_eq!(written, vec![10, 11, 12, 13]);
}
