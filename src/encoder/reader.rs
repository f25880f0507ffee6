//! Reading segment generations back, for verification and tests.

use super::format::{
    Component, IndexEntry, SegmentStatistics, StoredRow, component_path, data_digest,
    existing_generations,
};
use crate::io::compression::open_reader;
use anyhow::{Context, Result, bail, ensure};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Reader over the complete generations of one table directory.
#[derive(Debug, Clone)]
pub struct SegmentReader {
    directory: PathBuf,
    keyspace: String,
    table: String,
}

impl SegmentReader {
    pub fn new(directory: impl AsRef<Path>, keyspace: &str, table: &str) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            keyspace: keyspace.to_string(),
            table: table.to_string(),
        }
    }

    fn path(&self, generation: u32, component: Component) -> PathBuf {
        component_path(
            &self.directory,
            &self.keyspace,
            &self.table,
            generation,
            component,
        )
    }

    /// Generations with a TOC, ascending.
    pub fn generations(&self) -> Result<Vec<u32>> {
        existing_generations(&self.directory, &self.keyspace, &self.table, true)
    }

    pub fn statistics(&self, generation: u32) -> Result<SegmentStatistics> {
        let path = self.path(generation, Component::Statistics);
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parse {}", path.display()))
    }

    pub fn read_index(&self, generation: u32) -> Result<Vec<IndexEntry>> {
        let path = self.path(generation, Component::Index);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        postcard::from_bytes(&bytes).with_context(|| format!("decode {}", path.display()))
    }

    /// Decode every row of one generation, in stored order.
    pub fn read_generation(&self, generation: u32) -> Result<Vec<StoredRow>> {
        let stats = self.statistics(generation)?;
        let path = self.path(generation, Component::Data);
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let mut data = Vec::new();
        open_reader(BufReader::new(file), stats.compression.as_deref())?
            .read_to_end(&mut data)
            .with_context(|| format!("read {}", path.display()))?;
        ensure!(
            data.len() as u64 == stats.uncompressed_bytes,
            "{}: expected {} bytes of row data, found {}",
            path.display(),
            stats.uncompressed_bytes,
            data.len()
        );

        let mut rows = Vec::with_capacity(usize::try_from(stats.rows).unwrap_or(0));
        let mut rest = data.as_slice();
        while !rest.is_empty() {
            let Some((len, tail)) = rest.split_first_chunk::<4>() else {
                bail!("{}: truncated frame header", path.display());
            };
            let len = u32::from_le_bytes(*len) as usize;
            ensure!(tail.len() >= len, "{}: truncated frame", path.display());
            let (frame, tail) = tail.split_at(len);
            rows.push(postcard::from_bytes(frame).context("decode row frame")?);
            rest = tail;
        }
        ensure!(
            rows.len() as u64 == stats.rows,
            "{}: statistics record {} rows, found {}",
            path.display(),
            stats.rows,
            rows.len()
        );
        Ok(rows)
    }

    /// Compare `Data.db` against its recorded digest.
    pub fn verify_digest(&self, generation: u32) -> Result<bool> {
        let data_path = self.path(generation, Component::Data);
        let data = fs::read(&data_path).with_context(|| format!("read {}", data_path.display()))?;
        let digest_path = self.path(generation, Component::Digest);
        let recorded = fs::read_to_string(&digest_path)
            .with_context(|| format!("read {}", digest_path.display()))?;
        Ok(recorded.trim() == data_digest(&data))
    }

    /// Rows of every complete generation, in generation order.
    pub fn read_all(&self) -> Result<Vec<StoredRow>> {
        let mut rows = Vec::new();
        for generation in self.generations()? {
            rows.extend(self.read_generation(generation)?);
        }
        Ok(rows)
    }
}
