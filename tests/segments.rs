use bulkloader::encoder::{Component, Token};
use bulkloader::policy::{CollectingSink, Diagnostic, RecoveryPolicy};
use bulkloader::testing::*;
use bulkloader::{LoaderError, MappedRow, SegmentReader, TableSpec, TableWriter, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn reader(dir: &TempDirPath) -> SegmentReader {
    SegmentReader::new(
        dir.file_path("out").join(SAMPLE_KEYSPACE).join(SAMPLE_TABLE),
        SAMPLE_KEYSPACE,
        SAMPLE_TABLE,
    )
}

fn segment_writer(spec: TableSpec, sink: &CollectingSink) -> TableWriter {
    TableWriter::with_parts(
        spec,
        SAMPLE_INSERT,
        bulkloader::SegmentEncoderFactory,
        Arc::new(sink.clone()),
    )
    .unwrap()
}

// Puts a directory where generation 1's data file goes as soon as the first row is pulled.
fn blocking_first_generation(
    rows: Vec<MappedRow>,
    directory: PathBuf,
) -> impl Iterator<Item = MappedRow> {
    let obstruction = directory.join("metrics-readings-1-Data.db");
    rows.into_iter().enumerate().map(move |(i, row)| {
        if i == 0 {
            fs::create_dir_all(&obstruction).unwrap();
        }
        row
    })
}

#[test]
fn generated_segment_reads_back_in_storage_order() {
    let dir = TempDirPath::new().unwrap();
    let sink = CollectingSink::new();
    let writer = TableWriter::with_parts(
        sample_spec(dir.path()).unwrap(),
        SAMPLE_INSERT,
        bulkloader::SegmentEncoderFactory,
        Arc::new(sink.clone()),
    )
    .unwrap();

    let report = writer.generate(sample_rows(30)).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.segments.len(), 1);
    assert_eq!(report.segments[0].rows, 30);
    assert_eq!(report.segments[0].partitions, 3);

    let names = list_files(&report.directory).unwrap();
    for component in Component::ALL {
        assert!(
            names.contains(&format!("metrics-readings-1-{}", component.suffix())),
            "missing {component:?} in {names:?}"
        );
    }

    let reader = reader(&dir);
    assert!(reader.verify_digest(1).unwrap());
    let rows = reader.read_all().unwrap();
    assert_eq!(rows.len(), 30);
    for pair in rows.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(matches!(a.token, Token::Long(_)));
        assert!(a.token <= b.token);
        if a.partition_key == b.partition_key {
            assert!(a.clustering[0] > b.clustering[0], "clustering must be descending");
        }
    }
    assert_eq!(rows[0].cell("unit"), Some(&Value::text("celsius")));
}

#[test]
fn malformed_rows_are_skipped_by_the_segment_encoder() {
    let dir = TempDirPath::new().unwrap();
    let sink = CollectingSink::new();
    let writer = TableWriter::with_parts(
        sample_spec(dir.path()).unwrap(),
        SAMPLE_INSERT,
        bulkloader::SegmentEncoderFactory,
        Arc::new(sink.clone()),
    )
    .unwrap();

    let mut rows = sample_rows(10);
    rows[5] = malformed_row();
    let report = writer.generate(rows).unwrap();

    assert_eq!(report.rows_written, 9);
    assert_eq!(report.rows_failed, 1);
    let failures = sink.row_failures();
    assert_eq!(failures[0].row, 6);
    assert!(failures[0].message.contains("column at"), "{}", failures[0].message);
    assert_eq!(reader(&dir).read_all().unwrap().len(), 9);
}

#[test]
fn statement_with_unknown_column_fails_construction() {
    let dir = TempDirPath::new().unwrap();
    let err = TableWriter::new(
        sample_spec(dir.path()).unwrap(),
        "INSERT INTO metrics.readings (sensor, at, humidity) VALUES (?, ?, ?)",
    )
    .err()
    .unwrap();

    assert!(matches!(err, LoaderError::EncoderConstructionFailed { .. }));
    assert!(list_files(dir.file_path("out").join(SAMPLE_KEYSPACE).join(SAMPLE_TABLE))
        .unwrap()
        .is_empty());
}

#[test]
fn unsupported_partitioner_fails_construction() {
    let dir = TempDirPath::new().unwrap();
    let spec = sample_spec(dir.path())
        .unwrap()
        .with_partitioner("org.apache.cassandra.dht.RandomPartitioner");
    let err = TableWriter::new(spec, SAMPLE_INSERT).err().unwrap();
    assert!(matches!(err, LoaderError::EncoderConstructionFailed { .. }));
}

#[test]
fn malformed_schema_fails_construction() {
    let dir = TempDirPath::new().unwrap();
    let schema = write_schema(dir.path(), "CREATE TABLE metrics.readings (sensor text)").unwrap();
    let mut spec = sample_spec(dir.path()).unwrap();
    spec.schema = schema;
    let err = TableWriter::new(spec, SAMPLE_INSERT).err().unwrap();
    assert!(matches!(err, LoaderError::EncoderConstructionFailed { .. }));
}

#[test]
fn second_run_continues_generation_numbers() {
    let dir = TempDirPath::new().unwrap();
    for _ in 0..2 {
        TableWriter::new(sample_spec(dir.path()).unwrap(), SAMPLE_INSERT)
            .unwrap()
            .generate(sample_rows(4))
            .unwrap();
    }
    let reader = reader(&dir);
    assert_eq!(reader.generations().unwrap(), vec![1, 2]);
    assert_eq!(reader.read_all().unwrap().len(), 8);
}

#[test]
fn sorted_input_is_written_as_is() {
    let dir = TempDirPath::new().unwrap();
    let spec = sample_spec(dir.path())
        .unwrap()
        .with_sorted(true)
        .with_partitioner("ByteOrderedPartitioner");
    let sink = CollectingSink::new();
    let writer = TableWriter::with_parts(
        spec,
        SAMPLE_INSERT,
        bulkloader::SegmentEncoderFactory,
        Arc::new(sink.clone()),
    )
    .unwrap();

    // s0 newest first, then s1; the last row goes back to s0 and is rejected
    let rows = vec![
        sample_row(3),
        sample_row(0),
        sample_row(4),
        sample_row(1),
        sample_row(6),
    ];
    let report = writer.generate(rows).unwrap();

    assert_eq!(report.rows_written, 4);
    assert_eq!(report.rows_failed, 1);
    assert!(sink.row_failures()[0].message.contains("out of order"));
    let stats = reader(&dir).statistics(1).unwrap();
    assert!(stats.sorted_input);
    assert_eq!(stats.partitioner, "org.apache.cassandra.dht.ByteOrderedPartitioner");
}

#[cfg(feature = "compression-gzip")]
#[test]
fn compressed_output_round_trips() {
    let dir = TempDirPath::new().unwrap();
    let spec = sample_spec(dir.path()).unwrap().with_compression("gzip");
    let report = TableWriter::new(spec, SAMPLE_INSERT)
        .unwrap()
        .generate(sample_rows(100))
        .unwrap();
    assert!(report.is_clean());

    let reader = reader(&dir);
    let stats = reader.statistics(1).unwrap();
    assert_eq!(stats.compression.as_deref(), Some("gzip"));
    assert!(reader.verify_digest(1).unwrap());
    assert_eq!(reader.read_all().unwrap().len(), 100);
}

#[test]
fn failed_flush_mid_stream_reports_lost_rows() {
    let dir = TempDirPath::new().unwrap();
    let sink = CollectingSink::new();
    let spec = sample_spec(dir.path()).unwrap().with_buffer_size(1);
    let writer = segment_writer(spec, &sink);
    let rows = blocking_first_generation(sample_rows(20_000), writer.directory().to_path_buf());

    let report = writer.generate(rows).unwrap();

    assert!(report.rows_lost > 0);
    assert_eq!(report.rows_written + report.rows_lost, 20_000);
    assert_eq!(report.rows_failed, 0);
    assert!(!report.is_clean());
    assert!(report.finalization_error.is_none());
    assert!(report.segments.iter().all(|s| s.generation != 1));
    assert_eq!(sink.rows_lost(), report.rows_lost);
    assert!(sink.row_failures().is_empty());

    let reader = reader(&dir);
    assert!(!reader.generations().unwrap().contains(&1));
    assert_eq!(reader.read_all().unwrap().len() as u64, report.rows_written);
    assert!(
        list_files(&report.directory)
            .unwrap()
            .iter()
            .all(|name| !name.starts_with("metrics-readings-1-"))
    );
}

#[test]
fn lost_segment_aborts_under_fail_fast() {
    let dir = TempDirPath::new().unwrap();
    let sink = CollectingSink::new();
    let spec = sample_spec(dir.path())
        .unwrap()
        .with_buffer_size(1)
        .with_recovery(RecoveryPolicy::fail_fast());
    let writer = segment_writer(spec, &sink);
    let rows = blocking_first_generation(sample_rows(20_000), writer.directory().to_path_buf());

    let err = writer.generate(rows).unwrap_err();

    match err {
        LoaderError::SegmentWriteFailed {
            generation, rows, ..
        } => {
            assert_eq!(generation, 1);
            assert_eq!(rows, sink.rows_lost());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failed_final_flush_loses_the_buffer() {
    let dir = TempDirPath::new().unwrap();
    let sink = CollectingSink::new();
    let writer = segment_writer(sample_spec(dir.path()).unwrap(), &sink);
    let rows = blocking_first_generation(sample_rows(50), writer.directory().to_path_buf());

    let report = writer.generate(rows).unwrap();

    assert_eq!(report.rows_written, 0);
    assert_eq!(report.rows_lost, 50);
    assert!(report.finalization_error.is_some());
    assert!(report.segments.is_empty());
    assert!(matches!(
        sink.diagnostics().as_slice(),
        [
            Diagnostic::SegmentLost {
                generation: 1,
                rows: 50,
                ..
            },
            Diagnostic::FinalizationFailed { .. }
        ]
    ));
}
