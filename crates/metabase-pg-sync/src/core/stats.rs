//! Run statistics accumulated by the Executor.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind tag for a per-table failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    SchemaInspectionFailed,
    ExtractFailed,
    SchemaMismatch,
    InsertFailed,
    RowCountMismatch,
}

impl FailureKind {
    /// Stable kind name shown in summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SchemaInspectionFailed => "schema-inspection-failed",
            FailureKind::ExtractFailed => "extract-failed",
            FailureKind::SchemaMismatch => "schema-mismatch",
            FailureKind::InsertFailed => "insert-failed",
            FailureKind::RowCountMismatch => "row-count-mismatch",
        }
    }
}

/// A table that failed during the Sync phase.
#[derive(Debug, Clone, Serialize)]
pub struct TableFailure {
    /// Table name.
    pub table: String,

    /// Failure kind.
    pub kind: FailureKind,

    /// Human-readable detail.
    pub detail: String,
}

/// Per-run transformation counters. Never fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    /// Enum labels remapped by the case-insensitive, substring, or synonym
    /// rules.
    pub enum_transformations: u64,

    /// Values replaced by the first catalog label.
    pub default_substitutions: u64,

    /// Values nulled because the enum catalog entry was empty.
    pub null_substitutions: u64,

    /// Non-enum coercions that produced null from an unparseable input.
    pub coercion_failures: u64,
}

impl TransformStats {
    /// Fold another counter set into this one.
    pub fn merge(&mut self, other: &TransformStats) {
        self.enum_transformations += other.enum_transformations;
        self.default_substitutions += other.default_substitutions;
        self.null_substitutions += other.null_substitutions;
        self.coercion_failures += other.coercion_failures;
    }

    /// Total number of values that were rewritten or dropped.
    pub fn total(&self) -> u64 {
        self.enum_transformations
            + self.default_substitutions
            + self.null_substitutions
            + self.coercion_failures
    }
}

/// Statistics for a single replication run, owned by the Executor.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished (set at Finalize).
    pub finished_at: Option<DateTime<Utc>>,

    /// Tables discovered upstream.
    pub tables_total: usize,

    /// Tables synchronized without failure.
    pub tables_success: usize,

    /// Per-table failure records.
    pub failed: Vec<TableFailure>,

    /// Rows the upstream count queries promised.
    pub rows_planned: i64,

    /// Rows actually inserted into the target.
    pub rows_inserted: u64,

    /// Transformation counters aggregated across tables.
    pub transform: TransformStats,
}

impl RunStats {
    /// Start a fresh stats record.
    pub fn begin() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            tables_total: 0,
            tables_success: 0,
            failed: Vec::new(),
            rows_planned: 0,
            rows_inserted: 0,
            transform: TransformStats::default(),
        }
    }

    /// Record a table failure.
    pub fn record_failure(&mut self, table: impl Into<String>, kind: FailureKind, detail: impl Into<String>) {
        self.failed.push(TableFailure {
            table: table.into(),
            kind,
            detail: detail.into(),
        });
    }

    /// Duration of the run in seconds, zero until finished.
    pub fn duration_seconds(&self) -> f64 {
        match self.finished_at {
            Some(end) => (end - self.started_at).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        }
    }
}
