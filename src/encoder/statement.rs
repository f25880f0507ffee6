//! Binding of `INSERT` statements against a compiled table.

use super::ddl::{TableSchema, normalize_ident, parse_qualified_name, split_top_level, strip_comments};
use anyhow::{Result, anyhow, ensure};
use regex::Regex;
use std::sync::LazyLock;

static INSERT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*INSERT\s+INTO\s+((?:"(?:[^"]|"")+"|\w+)\s*\.\s*(?:"(?:[^"]|"")+"|\w+))\s*\((.*?)\)\s*VALUES\s*\((.*)\)\s*$"#,
    )
    .expect("valid insert regex")
});

/// An insert statement resolved to column positions in a [`TableSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    /// Schema column index for each bind marker, in statement order.
    pub columns: Vec<usize>,
}

impl InsertStatement {
    /// Bind `text` against `schema`.
    ///
    /// The statement must target the same table, name each column once, cover the
    /// whole primary key and use one `?` marker per column.
    pub fn bind(text: &str, schema: &TableSchema) -> Result<Self> {
        let stripped = strip_comments(text);
        let statement = stripped.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        let caps = INSERT
            .captures(statement)
            .ok_or_else(|| anyhow!("write statement is not an INSERT INTO ks.table (...) VALUES (...)"))?;

        let (keyspace, table) = parse_qualified_name(&caps[1])?;
        ensure!(
            keyspace == schema.keyspace && table == schema.table,
            "write statement targets {keyspace}.{table} but schema defines {}",
            schema.qualified_name()
        );

        let names = split_top_level(&caps[2], ',')
            .iter()
            .map(|s| normalize_ident(s.trim()))
            .collect::<Result<Vec<_>>>()?;
        let markers = split_top_level(&caps[3], ',');
        ensure!(
            markers.iter().all(|m| m.trim() == "?"),
            "write statement must use '?' bind markers for every value"
        );
        ensure!(
            names.len() == markers.len(),
            "write statement names {} columns but has {} bind markers",
            names.len(),
            markers.len()
        );

        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let idx = schema
                .column_index(name)
                .ok_or_else(|| anyhow!("unknown column '{name}' in {}", schema.qualified_name()))?;
            ensure!(!columns.contains(&idx), "column '{name}' is bound twice");
            columns.push(idx);
        }
        for &key in schema
            .partition_key
            .iter()
            .chain(schema.clustering.iter().map(|(i, _)| i))
        {
            ensure!(
                columns.contains(&key),
                "write statement is missing primary key column '{}'",
                schema.columns[key].name
            );
        }
        Ok(Self { columns })
    }

    /// Number of values each row must carry.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.columns.len()
    }
}

/// Render `INSERT INTO keyspace.table (c1, c2) VALUES (?, ?)`.
#[must_use]
pub fn render_insert<S: AsRef<str>>(keyspace: &str, table: &str, columns: &[S]) -> String {
    let names = columns.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ");
    let markers = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {keyspace}.{table} ({names}) VALUES ({markers})")
}
