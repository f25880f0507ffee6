//! In-memory representation of one mapped source row.
//!
//! A [`MappedRow`] is produced by an upstream mapper, handed to a
//! [`TableWriter`](crate::TableWriter) exactly once and dropped after the write
//! attempt. Values are positional: the `n`th value binds to the `n`th column of
//! the write statement.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single typed column value.
///
/// Values of the same variant order the way the storage engine compares them:
/// numbers numerically, text and blobs byte-wise. `Null` sorts first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Float(OrderedFloat<f32>),
    Double(OrderedFloat<f64>),
    Text(String),
    Blob(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// Short type descriptor used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Timestamp(_) => "timestamp",
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convenience constructor for text values.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Convenience constructor for double values.
    #[must_use]
    pub const fn double(v: f64) -> Self {
        Self::Double(OrderedFloat(v))
    }

    /// Convenience constructor for float values.
    #[must_use]
    pub const fn float(v: f32) -> Self {
        Self::Float(OrderedFloat(v))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) | Self::Timestamp(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", v.0),
            Self::Double(v) => write!(f, "{}", v.0),
            Self::Text(v) => write!(f, "'{v}'"),
            Self::Blob(v) => {
                write!(f, "0x")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One source record, ready for encoding.
///
/// `values` may be absent or empty, in which case the row is a no-op and the
/// writer skips it silently. `types` runs parallel to `values` and is only used
/// when reporting a failed row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedRow {
    pub values: Option<Vec<Value>>,
    pub types: Vec<String>,
}

impl MappedRow {
    /// Build a row with explicit type descriptors.
    pub fn new<S: Into<String>>(values: Vec<Value>, types: impl IntoIterator<Item = S>) -> Self {
        Self {
            values: Some(values),
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a row whose type descriptors are derived from the values themselves.
    #[must_use]
    pub fn typed(values: Vec<Value>) -> Self {
        let types = values.iter().map(|v| v.type_name().to_string()).collect();
        Self {
            values: Some(values),
            types,
        }
    }

    /// A row carrying no data.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the row has at least one value to write.
    #[must_use]
    pub fn has_values(&self) -> bool {
        self.values.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Values as a slice; empty when absent.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        self.values.as_deref().unwrap_or(&[])
    }

    /// Whether `types` lines up with `values`. Empty rows are always consistent.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.has_values() || self.values().len() == self.types.len()
    }
}

impl From<Vec<Value>> for MappedRow {
    fn from(values: Vec<Value>) -> Self {
        Self::typed(values)
    }
}
