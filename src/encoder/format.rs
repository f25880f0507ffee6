//! On-disk layout of a segment generation.
//!
//! A generation `N` of table `ks.t` is the file set
//!
//! ```text
//! ks-t-N-Data.db         length-prefixed postcard frames, one per row, optionally compressed
//! ks-t-N-Index.db        postcard list of partitions with their offset in the data stream
//! ks-t-N-Statistics.db   JSON summary (row counts, token range, partitioner, codec)
//! ks-t-N-Digest.sha256   SHA-256 of Data.db as written
//! ks-t-N-TOC.txt         component list, written last
//! ```
//!
//! A generation without its TOC is incomplete and ignored by readers.

use super::ddl::TableSchema;
use super::partitioner::Token;
use crate::row::Value;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

/// One file of a segment generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Data,
    Index,
    Statistics,
    Digest,
    Toc,
}

impl Component {
    pub const ALL: [Self; 5] = [
        Self::Data,
        Self::Index,
        Self::Statistics,
        Self::Digest,
        Self::Toc,
    ];

    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Data => "Data.db",
            Self::Index => "Index.db",
            Self::Statistics => "Statistics.db",
            Self::Digest => "Digest.sha256",
            Self::Toc => "TOC.txt",
        }
    }
}

#[must_use]
pub fn component_name(keyspace: &str, table: &str, generation: u32, component: Component) -> String {
    format!("{keyspace}-{table}-{generation}-{}", component.suffix())
}

#[must_use]
pub fn component_path(
    directory: &Path,
    keyspace: &str,
    table: &str,
    generation: u32,
    component: Component,
) -> PathBuf {
    directory.join(component_name(keyspace, table, generation, component))
}

/// Generations present in `directory`, ascending.
///
/// With `complete_only` only generations whose TOC exists are returned;
/// otherwise any component file claims its generation number.
pub fn existing_generations(
    directory: &Path,
    keyspace: &str,
    table: &str,
    complete_only: bool,
) -> Result<Vec<u32>> {
    let dir = directory
        .to_str()
        .ok_or_else(|| anyhow!("directory {} is not valid UTF-8", directory.display()))?;
    let suffix = if complete_only {
        Component::Toc.suffix()
    } else {
        "*"
    };
    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(dir),
        glob::Pattern::escape(&format!("{keyspace}-{table}-")) + "*-" + suffix
    );
    let prefix = format!("{keyspace}-{table}-");

    let mut generations = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("glob {pattern}"))? {
        let path = entry.context("list segment files")?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        if let Some(generation) = rest.split('-').next().and_then(|g| g.parse::<u32>().ok()) {
            generations.push(generation);
        }
    }
    generations.sort_unstable();
    generations.dedup();
    Ok(generations)
}

/// One row as stored in a data frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub token: Token,
    pub partition_key: Vec<Value>,
    pub clustering: Vec<Value>,
    /// Non-key columns bound by the write statement, in statement order.
    pub cells: Vec<(String, Value)>,
}

impl StoredRow {
    /// Look up a non-key cell by column name.
    #[must_use]
    pub fn cell(&self, column: &str) -> Option<&Value> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }
}

/// Entry of `Index.db`: where a partition starts in the uncompressed data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub token: Token,
    pub partition_key: Vec<Value>,
    pub offset: u64,
    pub rows: u64,
}

/// Contents of `Statistics.db`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStatistics {
    pub format_version: u32,
    pub keyspace: String,
    pub table: String,
    pub generation: u32,
    pub partitioner: String,
    pub compression: Option<String>,
    pub sorted_input: bool,
    pub rows: u64,
    pub partitions: u64,
    pub uncompressed_bytes: u64,
    pub data_bytes: u64,
    pub min_token: Option<Token>,
    pub max_token: Option<Token>,
    pub schema: TableSchema,
}

/// Summary of a finalized generation, as returned by [`Encoder::close`](super::Encoder::close).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub directory: PathBuf,
    pub keyspace: String,
    pub table: String,
    pub generation: u32,
    pub rows: u64,
    pub partitions: u64,
    pub data_bytes: u64,
}

impl SegmentDescriptor {
    #[must_use]
    pub fn path(&self, component: Component) -> PathBuf {
        component_path(
            &self.directory,
            &self.keyspace,
            &self.table,
            self.generation,
            component,
        )
    }
}

/// SHA-256 of a data block, as recorded in the digest component.
#[must_use]
pub fn data_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
