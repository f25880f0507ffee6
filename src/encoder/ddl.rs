//! Compiler for the `CREATE TABLE` subset understood by the segment encoder.
//!
//! Supported:
//! - `CREATE TABLE [IF NOT EXISTS] ks.table (...)` (also `COLUMNFAMILY`)
//! - scalar column types: `boolean`, `int`, `bigint`, `float`, `double`,
//!   `text`/`varchar`, `ascii`, `blob`, `timestamp`
//! - inline `PRIMARY KEY` or a table-level `PRIMARY KEY ((p1, p2), c1, c2)`
//! - `STATIC` columns
//! - `WITH CLUSTERING ORDER BY (c1 DESC, ...)`; other table options are ignored
//! - `--`, `//` and `/* */` comments
//!
//! Collections, UDTs and counters are rejected.

use crate::row::Value;
use anyhow::{Context, Result, anyhow, bail, ensure};
use ordered_float::OrderedFloat;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*CREATE\s+(?:TABLE|COLUMNFAMILY)\s+(?:IF\s+NOT\s+EXISTS\s+)?((?:"(?:[^"]|"")+"|\w+)(?:\s*\.\s*(?:"(?:[^"]|"")+"|\w+))?)\s*\("#,
    )
    .expect("valid header regex")
});

static PRIMARY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^PRIMARY\s+KEY\s*\((.*)\)$").expect("valid primary key regex")
});

static CLUSTERING_ORDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)CLUSTERING\s+ORDER\s+BY\s*\(([^)]*)\)").expect("valid clustering regex")
});

static PLAIN_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Scalar column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CqlType {
    Boolean,
    Int,
    BigInt,
    Float,
    Double,
    Text,
    Ascii,
    Blob,
    Timestamp,
}

impl CqlType {
    fn parse(name: &str) -> Result<Self> {
        let lower = name.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "boolean" => Self::Boolean,
            "int" => Self::Int,
            "bigint" => Self::BigInt,
            "float" => Self::Float,
            "double" => Self::Double,
            "text" | "varchar" => Self::Text,
            "ascii" => Self::Ascii,
            "blob" => Self::Blob,
            "timestamp" => Self::Timestamp,
            _ => bail!("unsupported column type '{name}'"),
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Text => "text",
            Self::Ascii => "ascii",
            Self::Blob => "blob",
            Self::Timestamp => "timestamp",
        }
    }

    /// Convert `value` into this type's canonical variant.
    ///
    /// Lossless widenings are accepted (`int` into `bigint`, `float` into
    /// `double`, `bigint` into `timestamp`, integers into floating point).
    /// `Null` passes through; callers decide whether null is allowed.
    pub fn coerce(self, value: Value) -> Result<Value> {
        let coerced = match (self, value) {
            (_, Value::Null) => Value::Null,
            (Self::Boolean, v @ Value::Boolean(_))
            | (Self::Int, v @ Value::Int(_))
            | (Self::BigInt, v @ Value::BigInt(_))
            | (Self::Float, v @ Value::Float(_))
            | (Self::Double, v @ Value::Double(_))
            | (Self::Text, v @ Value::Text(_))
            | (Self::Blob, v @ Value::Blob(_))
            | (Self::Timestamp, v @ Value::Timestamp(_)) => v,
            (Self::BigInt, Value::Int(v)) => Value::BigInt(i64::from(v)),
            (Self::Timestamp, Value::BigInt(v)) => Value::Timestamp(v),
            (Self::Timestamp, Value::Int(v)) => Value::Timestamp(i64::from(v)),
            (Self::Double, Value::Float(v)) => Value::Double(OrderedFloat(f64::from(v.0))),
            (Self::Double, Value::Int(v)) => Value::Double(OrderedFloat(f64::from(v))),
            (Self::Float, Value::Int(v)) if v.unsigned_abs() <= 1 << 24 => {
                Value::Float(OrderedFloat(v as f32))
            }
            (Self::Ascii, Value::Text(v)) => {
                ensure!(v.is_ascii(), "value '{v}' is not valid ascii");
                Value::Text(v)
            }
            (ty, other) => bail!(
                "expected {} but got {} value {other}",
                ty.name(),
                other.type_name()
            ),
        };
        Ok(coerced)
    }

    /// Append the storage serialization of an already coerced value.
    pub fn serialize_into(self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Boolean(v) => out.push(u8::from(*v)),
            Value::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::BigInt(v) | Value::Timestamp(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.0.to_bits().to_be_bytes()),
            Value::Double(v) => out.extend_from_slice(&v.0.to_bits().to_be_bytes()),
            Value::Text(v) => out.extend_from_slice(v.as_bytes()),
            Value::Blob(v) => out.extend_from_slice(v),
            Value::Null => bail!("cannot serialize null as {}", self.name()),
        }
        Ok(())
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sort direction of a clustering column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: CqlType,
    pub is_static: bool,
}

/// A compiled table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub keyspace: String,
    pub table: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Indices into `columns`, in key order.
    pub partition_key: Vec<usize>,
    pub clustering: Vec<(usize, ClusteringOrder)>,
}

impl TableSchema {
    /// Compile a single `CREATE TABLE` statement.
    pub fn compile(text: &str) -> Result<Self> {
        let stripped = strip_comments(text);
        let statement = stripped.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        ensure!(!statement.is_empty(), "schema is empty");
        ensure!(
            find_top_level(statement, ';').is_none(),
            "schema must describe exactly one table"
        );

        let header = HEADER
            .captures(statement)
            .ok_or_else(|| anyhow!("schema is not a CREATE TABLE statement"))?;
        let (keyspace, table) = parse_qualified_name(&header[1])?;

        let open = header.get(0).map_or(0, |m| m.end()) - 1;
        let close = matching_paren(statement, open)
            .ok_or_else(|| anyhow!("unbalanced parentheses in column definitions"))?;
        let body = &statement[open + 1..close];
        let options = statement[close + 1..].trim();
        if !options.is_empty() {
            ensure!(
                options.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("with")),
                "unexpected text after column definitions: '{options}'"
            );
        }

        let mut columns: Vec<ColumnDef> = Vec::new();
        let mut inline_key: Option<String> = None;
        let mut table_key: Option<String> = None;

        for def in split_top_level(body, ',') {
            let def = def.trim();
            if def.is_empty() {
                continue;
            }
            if let Some(caps) = PRIMARY_KEY.captures(def) {
                ensure!(table_key.is_none(), "PRIMARY KEY declared more than once");
                table_key = Some(caps[1].to_string());
                continue;
            }
            let column = parse_column(def, &mut inline_key)?;
            ensure!(
                !columns.iter().any(|c| c.name == column.name),
                "duplicate column '{}'",
                column.name
            );
            columns.push(column);
        }
        ensure!(!columns.is_empty(), "table {keyspace}.{table} declares no columns");

        let key_spec = match (inline_key, table_key) {
            (Some(_), Some(_)) => bail!("PRIMARY KEY declared more than once"),
            (Some(name), None) => quote_ident(&name),
            (None, Some(spec)) => spec,
            (None, None) => bail!("table {keyspace}.{table} has no PRIMARY KEY"),
        };
        let (partition_names, clustering_names) = parse_key_spec(&key_spec)?;

        let index_of = |name: &str| {
            columns
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| anyhow!("primary key column '{name}' is not defined"))
        };
        let partition_key = partition_names
            .iter()
            .map(|n| index_of(n.as_str()))
            .collect::<Result<Vec<_>>>()?;
        let mut clustering = clustering_names
            .iter()
            .map(|n| index_of(n.as_str()).map(|i| (i, ClusteringOrder::Asc)))
            .collect::<Result<Vec<_>>>()?;

        for &idx in partition_key.iter().chain(clustering.iter().map(|(i, _)| i)) {
            ensure!(
                !columns[idx].is_static,
                "primary key column '{}' cannot be static",
                columns[idx].name
            );
        }
        if clustering.is_empty()
            && let Some(c) = columns.iter().find(|c| c.is_static)
        {
            bail!("static column '{}' requires clustering columns", c.name);
        }

        if let Some(caps) = CLUSTERING_ORDER.captures(options) {
            apply_clustering_order(&caps[1], &columns, &mut clustering)?;
        }

        Ok(Self {
            keyspace,
            table,
            columns,
            partition_key,
            clustering,
        })
    }

    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    #[must_use]
    pub fn is_primary_key(&self, idx: usize) -> bool {
        self.partition_key.contains(&idx) || self.clustering.iter().any(|(i, _)| *i == idx)
    }
}

fn parse_column(def: &str, inline_key: &mut Option<String>) -> Result<ColumnDef> {
    let tokens: Vec<&str> = def.split_whitespace().collect();
    ensure!(tokens.len() >= 2, "malformed column definition '{def}'");
    let name = normalize_ident(tokens[0])?;
    let type_name = tokens[1];
    ensure!(
        !type_name.contains('<') && !tokens[2..].iter().any(|t| t.contains('<')),
        "unsupported column type in '{def}'"
    );
    let ty = CqlType::parse(type_name)?;

    let mut is_static = false;
    let mut rest = tokens[2..].iter().map(|t| t.to_ascii_lowercase());
    while let Some(word) = rest.next() {
        match word.as_str() {
            "static" => is_static = true,
            "primary" => {
                ensure!(
                    rest.next().as_deref() == Some("key"),
                    "malformed column definition '{def}'"
                );
                ensure!(inline_key.is_none(), "PRIMARY KEY declared more than once");
                *inline_key = Some(name.clone());
            }
            _ => bail!("unexpected '{word}' in column definition '{def}'"),
        }
    }
    Ok(ColumnDef {
        name,
        ty,
        is_static,
    })
}

fn parse_key_spec(spec: &str) -> Result<(Vec<String>, Vec<String>)> {
    let parts = split_top_level(spec, ',');
    let first = parts
        .first()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("PRIMARY KEY is empty"))?;

    let partition = if let Some(inner) = first.strip_prefix('(') {
        let inner = inner
            .strip_suffix(')')
            .ok_or_else(|| anyhow!("malformed partition key '{first}'"))?;
        split_top_level(inner, ',')
            .iter()
            .map(|s| normalize_ident(s.trim()))
            .collect::<Result<Vec<_>>>()?
    } else {
        vec![normalize_ident(first)?]
    };
    ensure!(!partition.is_empty(), "partition key is empty");

    let clustering = parts[1..]
        .iter()
        .map(|s| normalize_ident(s.trim()))
        .collect::<Result<Vec<_>>>()?;
    Ok((partition, clustering))
}

fn apply_clustering_order(
    spec: &str,
    columns: &[ColumnDef],
    clustering: &mut [(usize, ClusteringOrder)],
) -> Result<()> {
    for (position, entry) in split_top_level(spec, ',').iter().enumerate() {
        let tokens: Vec<&str> = entry.split_whitespace().collect();
        ensure!(
            !tokens.is_empty() && tokens.len() <= 2,
            "malformed clustering order '{entry}'"
        );
        let name = normalize_ident(tokens[0])?;
        let order = match tokens.get(1).map(|t| t.to_ascii_lowercase()).as_deref() {
            None | Some("asc") => ClusteringOrder::Asc,
            Some("desc") => ClusteringOrder::Desc,
            Some(other) => bail!("unknown clustering order '{other}'"),
        };
        let slot = clustering
            .get_mut(position)
            .ok_or_else(|| anyhow!("clustering order names more columns than the key has"))?;
        ensure!(
            columns[slot.0].name == name,
            "clustering order must list clustering columns in key order, found '{name}'"
        );
        slot.1 = order;
    }
    Ok(())
}

pub(crate) fn parse_qualified_name(raw: &str) -> Result<(String, String)> {
    let dot = find_top_level(raw, '.')
        .ok_or_else(|| anyhow!("table name '{raw}' must be qualified with a keyspace"))?;
    Ok((
        normalize_ident(raw[..dot].trim())?,
        normalize_ident(raw[dot + 1..].trim())?,
    ))
}

/// Case-fold unquoted identifiers and unquote quoted ones.
pub(crate) fn normalize_ident(raw: &str) -> Result<String> {
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        ensure!(!inner.is_empty(), "empty quoted identifier");
        return Ok(inner.replace("\"\"", "\""));
    }
    ensure!(PLAIN_IDENT.is_match(raw), "invalid identifier '{raw}'");
    Ok(raw.to_ascii_lowercase())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Remove comments outside of quoted strings and identifiers.
pub(crate) fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => skip_line(&mut chars),
            '/' if chars.peek() == Some(&'/') => skip_line(&mut chars),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for n in chars.by_ref() {
        if n == '\n' {
            break;
        }
    }
}

/// Split on `sep` where it is not nested in parentheses, angle brackets or quotes.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '<' => depth += 1,
                ')' | '>' => depth -= 1,
                _ if c == sep && depth == 0 => {
                    parts.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            },
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

fn find_top_level(s: &str, target: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                _ if c == target && depth == 0 => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in s[open..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Compile and attach the schema text on failure, for error messages.
pub(crate) fn compile_with_context(text: &str) -> Result<TableSchema> {
    TableSchema::compile(text).context("compile table schema")
}
