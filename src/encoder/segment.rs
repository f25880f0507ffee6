//! Buffered segment encoder.
//!
//! Rows are validated and coerced against the compiled schema on `append`, keyed
//! by `(token, partition key bytes, clustering values)` and buffered. When the
//! buffer passes its byte budget, or on `close`, the buffer is written out as one
//! immutable generation.
//!
//! Unsorted input is sorted at flush time; rows sharing a primary key keep the
//! last one appended. Sorted input is trusted to already be in key order and is
//! written as it arrived; a row that sorts before its predecessor is rejected.

use super::ddl::{ClusteringOrder, TableSchema, compile_with_context};
use super::format::{
    Component, FORMAT_VERSION, IndexEntry, SegmentDescriptor, SegmentStatistics, StoredRow,
    component_name, component_path, data_digest, existing_generations,
};
use super::partitioner::{Partitioner, Token};
use super::statement::InsertStatement;
use super::{Encoder, EncoderConfig, EncoderFactory, SegmentLost};
use crate::io::compression::{CompressionCodec, codec_by_name};
use crate::row::Value;
use anyhow::{Context, Result, anyhow, bail, ensure};
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-row bookkeeping overhead counted against the buffer budget.
const ROW_OVERHEAD: usize = 64;

/// Factory for [`SegmentEncoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentEncoderFactory;

impl EncoderFactory for SegmentEncoderFactory {
    type Encoder = SegmentEncoder;

    fn validate(&self, config: &EncoderConfig) -> Result<()> {
        Plan::compile(config).map(|_| ())
    }

    fn build(&self, config: &EncoderConfig) -> Result<SegmentEncoder> {
        SegmentEncoder::open(config)
    }
}

/// Everything derived from configuration before any file is touched.
struct Plan {
    schema: TableSchema,
    statement: InsertStatement,
    partitioner: Partitioner,
    codec: Option<Arc<dyn CompressionCodec>>,
}

impl Plan {
    fn compile(config: &EncoderConfig) -> Result<Self> {
        let schema = compile_with_context(&config.schema)?;
        ensure!(
            schema.keyspace == config.keyspace && schema.table == config.table,
            "schema defines {} but output is configured for {}",
            schema.qualified_name(),
            config.qualified_name()
        );
        let statement = InsertStatement::bind(&config.statement, &schema)
            .context("bind write statement")?;
        let partitioner = Partitioner::from_name(&config.partitioner)?;
        let codec = config
            .compression
            .as_deref()
            .map(codec_by_name)
            .transpose()?;
        ensure!(config.buffer_bytes > 0, "buffer size must be positive");
        Ok(Self {
            schema,
            statement,
            partitioner,
            codec,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RowKey {
    token: Token,
    partition: Vec<u8>,
    clustering: Vec<Value>,
}

struct PendingRow {
    key: RowKey,
    partition_key: Vec<Value>,
    frame: Vec<u8>,
}

/// Encoder writing immutable segment generations into one table directory.
pub struct SegmentEncoder {
    plan: Plan,
    directory: PathBuf,
    sorted: bool,
    buffer_bytes: usize,
    pending: Vec<PendingRow>,
    pending_bytes: usize,
    /// Rows accepted since the last written segment, replaced duplicates included.
    pending_rows: u64,
    last_key: Option<RowKey>,
    next_generation: u32,
    written: Vec<SegmentDescriptor>,
    closed: bool,
}

impl SegmentEncoder {
    /// Compile the configuration and bind to the output directory.
    pub fn open(config: &EncoderConfig) -> Result<Self> {
        let plan = Plan::compile(config)?;
        ensure!(
            config.directory.is_dir(),
            "output directory {} does not exist",
            config.directory.display()
        );
        let existing = existing_generations(
            &config.directory,
            &config.keyspace,
            &config.table,
            false,
        )?;
        let next_generation = match existing.last() {
            None => 1,
            Some(&last) => {
                let Some(next) = last.checked_add(1) else {
                    bail!(
                        "{} already holds generation {last}, no generation number is left",
                        config.directory.display()
                    );
                };
                next
            }
        };

        tracing::debug!(
            table = %config.qualified_name(),
            directory = %config.directory.display(),
            partitioner = %plan.partitioner,
            sorted = config.sorted,
            buffer_bytes = config.buffer_bytes,
            next_generation,
            "segment encoder ready"
        );

        Ok(Self {
            plan,
            directory: config.directory.clone(),
            sorted: config.sorted,
            buffer_bytes: config.buffer_bytes,
            pending: Vec::new(),
            pending_bytes: 0,
            pending_rows: 0,
            last_key: None,
            next_generation,
            written: Vec::new(),
            closed: false,
        })
    }

    /// Schema this encoder was compiled against.
    #[must_use]
    pub const fn schema(&self) -> &TableSchema {
        &self.plan.schema
    }

    /// Rows currently buffered and not yet in a segment.
    #[must_use]
    pub fn buffered_rows(&self) -> usize {
        self.pending.len()
    }

    fn encode(&self, values: &[Value]) -> Result<PendingRow> {
        let schema = &self.plan.schema;
        let arity = self.plan.statement.arity();
        ensure!(
            values.len() == arity,
            "row has {} values but the write statement binds {arity}",
            values.len()
        );

        let mut bound: Vec<Option<Value>> = vec![None; schema.columns.len()];
        for (value, &col) in values.iter().zip(&self.plan.statement.columns) {
            let column = &schema.columns[col];
            let coerced = column
                .ty
                .coerce(value.clone())
                .with_context(|| format!("column {}", column.name))?;
            if coerced.is_null() && schema.is_primary_key(col) {
                bail!("primary key column {} must not be null", column.name);
            }
            bound[col] = Some(coerced);
        }

        let take = |idx: usize| {
            bound[idx]
                .clone()
                .ok_or_else(|| anyhow!("column {} is not bound", schema.columns[idx].name))
        };
        let partition_key = schema
            .partition_key
            .iter()
            .map(|&i| take(i))
            .collect::<Result<Vec<_>>>()?;
        let clustering = schema
            .clustering
            .iter()
            .map(|&(i, _)| take(i))
            .collect::<Result<Vec<_>>>()?;

        let partition = self.partition_bytes(&partition_key)?;
        let token = self.plan.partitioner.token(&partition);
        let cells = self
            .plan
            .statement
            .columns
            .iter()
            .filter(|&&col| !schema.is_primary_key(col))
            .filter_map(|&col| {
                bound[col]
                    .clone()
                    .map(|v| (schema.columns[col].name.clone(), v))
            })
            .collect();

        let stored = StoredRow {
            token: token.clone(),
            partition_key,
            clustering: clustering.clone(),
            cells,
        };
        let frame = postcard::to_allocvec(&stored).context("serialize row")?;

        Ok(PendingRow {
            key: RowKey {
                token,
                partition,
                clustering,
            },
            partition_key: stored.partition_key,
            frame,
        })
    }

    // Single-component keys are the raw value; composite keys are
    // length-prefixed components each followed by a zero byte.
    fn partition_bytes(&self, key: &[Value]) -> Result<Vec<u8>> {
        let schema = &self.plan.schema;
        let mut out = Vec::new();
        if let [only] = key {
            schema.columns[schema.partition_key[0]]
                .ty
                .serialize_into(only, &mut out)?;
            return Ok(out);
        }
        for (value, &idx) in key.iter().zip(&schema.partition_key) {
            let mut component = Vec::new();
            schema.columns[idx].ty.serialize_into(value, &mut component)?;
            let len = u16::try_from(component.len()).map_err(|_| {
                anyhow!(
                    "partition key component {} exceeds 65535 bytes",
                    schema.columns[idx].name
                )
            })?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&component);
            out.push(0);
        }
        Ok(out)
    }

    fn compare(&self, a: &RowKey, b: &RowKey) -> Ordering {
        a.token
            .cmp(&b.token)
            .then_with(|| a.partition.cmp(&b.partition))
            .then_with(|| {
                for ((x, y), (_, order)) in a
                    .clustering
                    .iter()
                    .zip(&b.clustering)
                    .zip(&self.plan.schema.clustering)
                {
                    let ord = match order {
                        ClusteringOrder::Asc => x.cmp(y),
                        ClusteringOrder::Desc => y.cmp(x),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            })
    }

    fn push(&mut self, row: PendingRow) -> Result<()> {
        if self.sorted {
            if let Some(last) = &self.last_key {
                match self.compare(&row.key, last) {
                    Ordering::Less => bail!(
                        "row with token {} is out of order for a sorted writer (previous token {})",
                        row.key.token,
                        last.token
                    ),
                    Ordering::Equal => {
                        if let Some(prev) = self.pending.last_mut() {
                            self.pending_bytes -= prev.frame.len() + ROW_OVERHEAD;
                            self.pending_bytes += row.frame.len() + ROW_OVERHEAD;
                            *prev = row;
                            self.pending_rows += 1;
                            return Ok(());
                        }
                    }
                    Ordering::Greater => {}
                }
            }
            self.last_key = Some(row.key.clone());
        }
        self.pending_bytes += row.frame.len() + ROW_OVERHEAD;
        self.pending_rows += 1;
        self.pending.push(row);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut rows = std::mem::take(&mut self.pending);
        let accepted = std::mem::take(&mut self.pending_rows);
        self.pending_bytes = 0;

        if !self.sorted {
            rows.sort_by(|a, b| self.compare(&a.key, &b.key));
            rows = dedup_keep_last(rows);
        }

        let generation = self.next_generation;
        let written = match generation.checked_add(1) {
            Some(next) => {
                self.next_generation = next;
                self.write_generation(generation, &rows)
            }
            None => Err(anyhow!("generation {generation} is the last generation number")),
        };
        written.map_err(|source| {
            tracing::error!(
                directory = %self.directory.display(),
                generation,
                rows = accepted,
                error = %format!("{source:#}"),
                "segment lost"
            );
            anyhow::Error::new(SegmentLost {
                generation,
                rows: accepted,
                source,
            })
        })
    }

    fn write_generation(&mut self, generation: u32, rows: &[PendingRow]) -> Result<()> {
        let schema = &self.plan.schema;
        let (keyspace, table) = (schema.keyspace.clone(), schema.table.clone());

        let mut data = Vec::with_capacity(rows.iter().map(|r| r.frame.len() + 4).sum());
        let mut index: Vec<IndexEntry> = Vec::new();
        for row in rows {
            let same_partition = index.last().is_some_and(|e: &IndexEntry| {
                e.token == row.key.token && e.partition_key == row.partition_key
            });
            if same_partition {
                if let Some(entry) = index.last_mut() {
                    entry.rows += 1;
                }
            } else {
                index.push(IndexEntry {
                    token: row.key.token.clone(),
                    partition_key: row.partition_key.clone(),
                    offset: data.len() as u64,
                    rows: 1,
                });
            }
            let len = u32::try_from(row.frame.len()).context("row frame exceeds 4 GiB")?;
            data.extend_from_slice(&len.to_le_bytes());
            data.extend_from_slice(&row.frame);
        }

        let uncompressed_bytes = data.len() as u64;
        let data = match &self.plan.codec {
            Some(codec) => codec
                .compress(&data)
                .with_context(|| format!("compress data with {}", codec.name()))?,
            None => data,
        };

        let stats = SegmentStatistics {
            format_version: FORMAT_VERSION,
            keyspace: keyspace.clone(),
            table: table.clone(),
            generation,
            partitioner: self.plan.partitioner.class_name().to_string(),
            compression: self.plan.codec.as_ref().map(|c| c.name().to_string()),
            sorted_input: self.sorted,
            rows: rows.len() as u64,
            partitions: index.len() as u64,
            uncompressed_bytes,
            data_bytes: data.len() as u64,
            min_token: index.iter().map(|e| &e.token).min().cloned(),
            max_token: index.iter().map(|e| &e.token).max().cloned(),
            schema: schema.clone(),
        };

        let digest = data_digest(&data);
        let toc = Component::ALL
            .iter()
            .map(|&c| component_name(&keyspace, &table, generation, c))
            .collect::<Vec<_>>()
            .join("\n");
        // TOC goes last: a generation without one is never read back.
        let components = [
            (Component::Data, data),
            (
                Component::Index,
                postcard::to_allocvec(&index).context("serialize index")?,
            ),
            (
                Component::Statistics,
                serde_json::to_vec_pretty(&stats).context("serialize statistics")?,
            ),
            (Component::Digest, format!("{digest}\n").into_bytes()),
            (Component::Toc, format!("{toc}\n").into_bytes()),
        ];

        let mut created = Vec::with_capacity(components.len());
        for (component, bytes) in &components {
            let path = component_path(&self.directory, &keyspace, &table, generation, *component);
            let preexisting = path.symlink_metadata().is_ok();
            let result = fs::write(&path, bytes);
            if !preexisting {
                created.push(path.clone());
            }
            if let Err(err) = result {
                remove_partial(&created);
                return Err(err).with_context(|| format!("write {}", path.display()));
            }
        }

        tracing::info!(
            table = %format!("{keyspace}.{table}"),
            generation,
            rows = stats.rows,
            partitions = stats.partitions,
            data_bytes = stats.data_bytes,
            "segment written"
        );

        self.written.push(SegmentDescriptor {
            directory: self.directory.clone(),
            keyspace,
            table,
            generation,
            rows: stats.rows,
            partitions: stats.partitions,
            data_bytes: stats.data_bytes,
        });
        Ok(())
    }
}

fn remove_partial(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path)
            && err.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = %err, "unable to remove partial segment file");
        }
    }
}

fn dedup_keep_last(rows: Vec<PendingRow>) -> Vec<PendingRow> {
    let mut out: Vec<PendingRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match out.last_mut() {
            Some(prev) if prev.key == row.key => *prev = row,
            _ => out.push(row),
        }
    }
    out
}

impl Encoder for SegmentEncoder {
    fn append(&mut self, values: &[Value]) -> Result<()> {
        ensure!(!self.closed, "encoder is already closed");
        let row = self.encode(values)?;
        self.push(row)?;
        if self.pending_bytes >= self.buffer_bytes {
            self.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<Vec<SegmentDescriptor>> {
        ensure!(!self.closed, "encoder is already closed");
        self.closed = true;
        self.flush()?;
        Ok(std::mem::take(&mut self.written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::reader::SegmentReader;
    use tempfile::TempDir;

    const SCHEMA: &str = "CREATE TABLE ks.readings (
        sensor text, at bigint, value double,
        PRIMARY KEY (sensor, at)
    ) WITH CLUSTERING ORDER BY (at DESC)";
    const INSERT: &str = "INSERT INTO ks.readings (sensor, at, value) VALUES (?, ?, ?)";

    fn config(dir: &TempDir) -> EncoderConfig {
        EncoderConfig {
            directory: dir.path().to_path_buf(),
            keyspace: "ks".into(),
            table: "readings".into(),
            schema: SCHEMA.into(),
            statement: INSERT.into(),
            buffer_bytes: 1 << 20,
            sorted: false,
            partitioner: "Murmur3Partitioner".into(),
            compression: None,
        }
    }

    fn row(sensor: &str, at: i64, value: f64) -> Vec<Value> {
        vec![Value::text(sensor), Value::BigInt(at), Value::double(value)]
    }

    #[test]
    fn unsorted_rows_come_out_in_token_then_clustering_order() {
        let dir = TempDir::new().unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir)).unwrap();
        for (s, at) in [("a", 1), ("b", 5), ("a", 3), ("c", 2), ("b", 9)] {
            enc.append(&row(s, at, 0.0)).unwrap();
        }
        let segments = enc.close().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].rows, 5);
        assert_eq!(segments[0].partitions, 3);

        let rows = SegmentReader::new(dir.path(), "ks", "readings")
            .read_generation(1)
            .unwrap();
        let keys: Vec<(&Token, &Value)> = rows.iter().map(|r| (&r.token, &r.clustering[0])).collect();
        for pair in keys.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            assert!(t0 < t1 || (t0 == t1 && c0 > c1), "rows out of order: {pair:?}");
        }
    }

    #[test]
    fn duplicate_keys_keep_last_row() {
        let dir = TempDir::new().unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir)).unwrap();
        enc.append(&row("a", 1, 1.0)).unwrap();
        enc.append(&row("a", 1, 2.0)).unwrap();
        let segments = enc.close().unwrap();
        assert_eq!(segments[0].rows, 1);
        let rows = SegmentReader::new(dir.path(), "ks", "readings")
            .read_generation(1)
            .unwrap();
        assert_eq!(rows[0].cell("value"), Some(&Value::double(2.0)));
    }

    #[test]
    fn small_buffer_rolls_generations() {
        let dir = TempDir::new().unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir).with_buffer_bytes(1)).unwrap();
        for at in 0..3 {
            enc.append(&row("s", at, 0.5)).unwrap();
        }
        let segments = enc.close().unwrap();
        assert_eq!(
            segments.iter().map(|s| s.generation).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for s in &segments {
            assert!(s.path(Component::Toc).is_file());
        }
    }

    #[test]
    fn sorted_mode_rejects_regressions() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.sorted = true;
        cfg.partitioner = "ByteOrderedPartitioner".into();
        let mut enc = SegmentEncoder::open(&cfg).unwrap();
        enc.append(&row("a", 9, 0.0)).unwrap();
        enc.append(&row("a", 3, 0.0)).unwrap();
        enc.append(&row("b", 1, 0.0)).unwrap();
        let err = enc.append(&row("a", 1, 0.0)).unwrap_err();
        assert!(err.to_string().contains("out of order"));
        // clustering is DESC, so a larger timestamp within "b" also regresses
        assert!(enc.append(&row("b", 7, 0.0)).is_err());
        assert_eq!(enc.close().unwrap()[0].rows, 3);
    }

    #[test]
    fn rejects_bad_values() {
        let dir = TempDir::new().unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir)).unwrap();
        assert!(enc.append(&[Value::text("a"), Value::BigInt(1)]).is_err());
        assert!(
            enc.append(&[Value::text("a"), Value::text("x"), Value::double(1.0)])
                .is_err()
        );
        assert!(
            enc.append(&[Value::Null, Value::BigInt(1), Value::double(1.0)])
                .is_err()
        );
        enc.append(&[Value::text("a"), Value::Int(1), Value::Null]).unwrap();
        assert_eq!(enc.buffered_rows(), 1);
    }

    #[test]
    fn close_is_single_use() {
        let dir = TempDir::new().unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir)).unwrap();
        assert!(enc.close().unwrap().is_empty());
        assert!(enc.close().is_err());
        assert!(enc.append(&row("a", 1, 0.0)).is_err());
    }

    #[test]
    fn generations_continue_after_existing_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ks-readings-7-Data.db"), b"").unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir)).unwrap();
        enc.append(&row("a", 1, 0.0)).unwrap();
        assert_eq!(enc.close().unwrap()[0].generation, 8);
    }

    #[test]
    fn failed_flush_reports_lost_rows_and_removes_partial_files() {
        let dir = TempDir::new().unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir).with_buffer_bytes(1)).unwrap();
        fs::create_dir(dir.path().join("ks-readings-1-Index.db")).unwrap();

        let err = enc.append(&row("a", 1, 0.0)).unwrap_err();
        let lost = err.downcast_ref::<SegmentLost>().unwrap();
        assert_eq!((lost.generation, lost.rows), (1, 1));
        assert!(!dir.path().join("ks-readings-1-Data.db").exists());
        assert_eq!(enc.buffered_rows(), 0);

        enc.append(&row("a", 2, 0.0)).unwrap();
        let segments = enc.close().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].generation, 2);
        assert_eq!(
            SegmentReader::new(dir.path(), "ks", "readings")
                .read_all()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn lost_batch_counts_replaced_duplicates() {
        let dir = TempDir::new().unwrap();
        let mut enc = SegmentEncoder::open(&config(&dir)).unwrap();
        fs::create_dir(dir.path().join("ks-readings-1-Data.db")).unwrap();
        enc.append(&row("a", 1, 1.0)).unwrap();
        enc.append(&row("a", 1, 2.0)).unwrap();
        enc.append(&row("b", 1, 2.0)).unwrap();

        let err = enc.close().unwrap_err();
        assert_eq!(err.downcast_ref::<SegmentLost>().unwrap().rows, 3);
    }

    #[test]
    fn exhausted_generation_numbers_fail_to_open() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(format!("ks-readings-{}-Data.db", u32::MAX)), b"").unwrap();
        let err = SegmentEncoder::open(&config(&dir)).err().unwrap();
        assert!(err.to_string().contains("no generation number is left"), "{err}");
    }

    #[test]
    fn construction_rejects_mismatches() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.table = "other".into();
        assert!(SegmentEncoderFactory.validate(&cfg).is_err());

        let mut cfg = config(&dir);
        cfg.partitioner = "RandomPartitioner".into();
        assert!(SegmentEncoderFactory.validate(&cfg).is_err());

        let mut cfg = config(&dir);
        cfg.compression = Some("snappy-ish".into());
        assert!(SegmentEncoderFactory.validate(&cfg).is_err());

        let mut cfg = config(&dir);
        cfg.directory = dir.path().join("missing");
        assert!(SegmentEncoderFactory.validate(&cfg).is_ok());
        assert!(SegmentEncoderFactory.build(&cfg).is_err());
    }
}
