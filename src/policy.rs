//! Row failure handling and diagnostic reporting.
//!
//! Malformed rows are expected in bulk loads. By default a failing row is reported
//! to the injected [`DiagnosticSink`] and the stream carries on; a
//! [`RecoveryPolicy`] can instead abort on the first failure or after a number of
//! failures.
//!
//! # Example
//!
//! ```
//! use bulkloader::policy::{CollectingSink, Diagnostic, DiagnosticSink, RowFailure};
//! use bulkloader::Value;
//!
//! let sink = CollectingSink::new();
//! sink.report(&Diagnostic::RowFailed(RowFailure {
//!     table: "ks.t".into(),
//!     row: 3,
//!     values: vec![Value::text("oops")],
//!     types: vec!["text".into()],
//!     statement: "INSERT INTO ks.t (id) VALUES (?)".into(),
//!     message: "column id expects int".into(),
//! }));
//! assert_eq!(sink.row_failures().len(), 1);
//! ```

use crate::row::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// What to do once a row has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Report the row and keep going.
    #[default]
    LogAndContinue,
    /// Report the row and stop the table.
    FailFast,
}

/// Per-table recovery policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    #[serde(default)]
    pub mode: RecoveryMode,
    /// Abort once more than this many rows failed (`None` or 0 = unlimited).
    #[serde(default)]
    pub max_failures: Option<u64>,
}

/// Outcome of consulting the policy after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Abort,
    LimitExceeded,
}

impl RecoveryPolicy {
    #[must_use]
    pub const fn log_and_continue() -> Self {
        Self {
            mode: RecoveryMode::LogAndContinue,
            max_failures: None,
        }
    }

    #[must_use]
    pub const fn fail_fast() -> Self {
        Self {
            mode: RecoveryMode::FailFast,
            max_failures: None,
        }
    }

    #[must_use]
    pub const fn with_max_failures(mut self, max: u64) -> Self {
        self.max_failures = Some(max);
        self
    }

    /// Decide after the `failures`th failed row.
    #[must_use]
    pub fn decide(&self, failures: u64) -> Decision {
        if self.mode == RecoveryMode::FailFast {
            return Decision::Abort;
        }
        match self.max_failures {
            Some(max) if max > 0 && failures > max => Decision::LimitExceeded,
            _ => Decision::Continue,
        }
    }
}

/// Full context of a row that could not be encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    /// `keyspace.table`
    pub table: String,
    /// 1-based position of the row in the producer's stream.
    pub row: u64,
    pub values: Vec<Value>,
    pub types: Vec<String>,
    pub statement: String,
    pub message: String,
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self
            .values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "unable to write row #{} using values [{}] with types [{}] by insert statement {}: {}",
            self.row,
            values,
            self.types.join(", "),
            self.statement,
            self.message
        )
    }
}

/// A reportable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    RowFailed(RowFailure),
    /// Rows already accepted by the encoder that never reached disk.
    SegmentLost {
        table: String,
        generation: u32,
        rows: u64,
        message: String,
    },
    FinalizationFailed { table: String, message: String },
}

/// Destination for failure records, injected into each writer.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

/// Default sink: one `tracing` error event per diagnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::RowFailed(failure) => tracing::error!(
                table = %failure.table,
                row = failure.row,
                types = ?failure.types,
                statement = %failure.statement,
                "{failure}"
            ),
            Diagnostic::SegmentLost {
                table,
                generation,
                rows,
                message,
            } => tracing::error!(
                table = %table,
                generation,
                rows,
                "unable to write segment, buffered rows lost: {message}"
            ),
            Diagnostic::FinalizationFailed { table, message } => {
                tracing::error!(table = %table, "unable to finalize segments: {message}");
            }
        }
    }
}

/// In-memory sink that keeps every diagnostic, for assertions and batch reporting.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    inner: Arc<Mutex<Vec<Diagnostic>>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.lock().map(|d| d.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn row_failures(&self) -> Vec<RowFailure> {
        self.diagnostics()
            .into_iter()
            .filter_map(|d| match d {
                Diagnostic::RowFailed(f) => Some(f),
                Diagnostic::SegmentLost { .. } | Diagnostic::FinalizationFailed { .. } => None,
            })
            .collect()
    }

    /// Total rows reported lost with failed segments.
    #[must_use]
    pub fn rows_lost(&self) -> u64 {
        self.diagnostics()
            .iter()
            .map(|d| match d {
                Diagnostic::SegmentLost { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|d| d.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut d) = self.inner.lock() {
            d.clear();
        }
    }

    /// Export diagnostics as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.diagnostics())
    }

    /// Write diagnostics to a JSON file.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = self.to_json().map_err(io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        if let Ok(mut d) = self.inner.lock() {
            d.push(diagnostic.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_always_continues() {
        let p = RecoveryPolicy::default();
        assert_eq!(p.decide(1), Decision::Continue);
        assert_eq!(p.decide(10_000), Decision::Continue);
    }

    #[test]
    fn fail_fast_aborts_on_first_failure() {
        assert_eq!(RecoveryPolicy::fail_fast().decide(1), Decision::Abort);
    }

    #[test]
    fn limit_is_exclusive() {
        let p = RecoveryPolicy::log_and_continue().with_max_failures(2);
        assert_eq!(p.decide(2), Decision::Continue);
        assert_eq!(p.decide(3), Decision::LimitExceeded);
        assert_eq!(
            RecoveryPolicy::log_and_continue().with_max_failures(0).decide(99),
            Decision::Continue
        );
    }

    #[test]
    fn failure_message_carries_full_context() {
        let f = RowFailure {
            table: "ks.t".into(),
            row: 7,
            values: vec![Value::Int(1), Value::text("x")],
            types: vec!["int".into(), "text".into()],
            statement: "INSERT INTO ks.t (a, b) VALUES (?, ?)".into(),
            message: "boom".into(),
        };
        let msg = f.to_string();
        assert!(msg.contains("#7"));
        assert!(msg.contains("[1, 'x']"));
        assert!(msg.contains("[int, text]"));
        assert!(msg.contains("INSERT INTO ks.t"));
    }

    #[test]
    fn collecting_sink_exports_json() {
        let sink = CollectingSink::new();
        sink.report(&Diagnostic::FinalizationFailed {
            table: "ks.t".into(),
            message: "disk full".into(),
        });
        let json = sink.to_json().unwrap();
        assert!(json.contains("finalization_failed"));
        assert!(json.contains("disk full"));
        assert!(sink.row_failures().is_empty());
        sink.clear();
        assert!(sink.is_empty());
    }
}
