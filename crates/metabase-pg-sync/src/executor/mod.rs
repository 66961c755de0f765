//! Run orchestration: phases, statistics, rollback, cleanup.
//!
//! The phase sequence is `AUTH → CONNECT → DISCOVER → PLAN →
//! (ANALYZE | CLEAR → SYNC) → FINALIZE → CLEANUP`. Any fatal error aborts
//! into cleanup; cleanup errors are logged, never propagated.

pub mod retry;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::{ConflictPolicy, RunConfig, RunMode};
use crate::core::stats::{FailureKind, RunStats, TableFailure, TransformStats};
use crate::core::value::Row;
use crate::error::{Result, SyncError};
use crate::loader::{quote_ident, LoadOptions, Loader};
use crate::plan::{plan, TablePlan};
use crate::schema::{EnumCatalog, SchemaInspector, TypeFamily};
use crate::target::{bootstrap_database, is_missing_database, TargetConn};
use crate::transform::Transformer;
use crate::upstream::{page_loop_done, TableDescriptor, UpstreamClient};

use retry::{with_backoff, BackoffPolicy};

/// Rows sampled per table during dry-run analysis.
const DRY_RUN_SAMPLE: usize = 10;

/// Progress notifications emitted while a run advances.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A phase began.
    PhaseStarted { name: &'static str },

    /// A table is about to sync. `index` is zero-based.
    TableStarted {
        table: String,
        index: usize,
        total: usize,
    },

    /// A table finished syncing (or failed).
    TableFinished {
        table: String,
        rows: u64,
        failed: bool,
    },

    /// The run is over; no further events follow.
    RunFinished,
}

/// Dry-run findings for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableAnalysis {
    /// Table name.
    pub table: String,

    /// Rows inspected (at most the sample size).
    pub rows_sampled: usize,

    /// Values the Transformer would rewrite or drop.
    pub transformation_needed: usize,

    /// Whether the table has enum-typed columns.
    pub schema_change: bool,

    /// Analysis error, if the sample could not be fetched.
    pub error: Option<String>,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Whether this was a dry run.
    pub dry_run: bool,

    /// Tables discovered upstream.
    pub tables_total: usize,

    /// Tables synchronized without failure.
    pub tables_success: usize,

    /// Rows the upstream count queries promised.
    pub rows_planned: i64,

    /// Rows actually inserted.
    pub rows_inserted: u64,

    /// Per-table failure records; non-empty only in continue-on-error
    /// mode, since failures are otherwise fatal at Finalize.
    pub failed_tables: Vec<TableFailure>,

    /// Transformation counters aggregated across tables.
    pub transform: TransformStats,

    /// Dry-run analyses (empty in sync mode).
    pub analyses: Vec<TableAnalysis>,
}

impl SyncOutcome {
    /// Whether every table synchronized cleanly.
    pub fn succeeded(&self) -> bool {
        self.failed_tables.is_empty()
    }
}

/// Drives a full replication run and owns its resources.
pub struct Executor {
    config: RunConfig,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Executor {
    /// Create an executor for the given configuration.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            progress: None,
            cancel: None,
        }
    }

    /// Emit progress events to the given channel.
    #[must_use]
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Observe a cancellation flag between phases, tables, and pages.
    #[must_use]
    pub fn with_cancel(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }

    /// Run the replication to completion.
    ///
    /// Per-table failures accrue in the run statistics; at Finalize they
    /// become a fatal [`SyncError::SyncFailed`] (after the rollback, when
    /// enabled) unless continue-on-error is set, in which case the run
    /// succeeds and the outcome carries the failed list.
    pub async fn run(self) -> Result<SyncOutcome> {
        let mut stats = RunStats::begin();

        self.phase("Authenticate");
        self.check_cancelled()?;
        let mut upstream = UpstreamClient::new(&self.config)?;
        upstream.authenticate().await?;

        self.phase("Connect");
        let conn = match self.connect_with_retry().await {
            Ok(conn) => conn,
            Err(e) => {
                upstream.logout().await;
                return Err(e);
            }
        };

        let outcome = self.drive(&mut upstream, &conn, &mut stats).await;

        self.phase("Cleanup");
        upstream.logout().await;
        conn.close().await;
        self.emit(ProgressEvent::RunFinished);

        outcome
    }

    /// Connect to the target with backoff, bootstrapping the database once
    /// if it does not exist.
    async fn connect_with_retry(&self) -> Result<TargetConn> {
        let policy = BackoffPolicy::default();
        let bootstrapped = std::cell::Cell::new(false);
        let config = &self.config;
        let bootstrapped = &bootstrapped;

        with_backoff(&policy, move || async move {
            match TargetConn::open(config, &config.target_name).await {
                Err(e) if is_missing_database(&e) && !bootstrapped.get() => {
                    bootstrapped.set(true);
                    bootstrap_database(config).await?;
                    TargetConn::open(config, &config.target_name).await
                }
                other => other,
            }
        })
        .await
        .map_err(|e| match e {
            SyncError::Connect(_) => e,
            other => SyncError::Connect(other.to_string()),
        })
    }

    /// Discover, plan, and either analyze (dry run) or clear and sync.
    async fn drive(
        &self,
        upstream: &mut UpstreamClient,
        conn: &TargetConn,
        stats: &mut RunStats,
    ) -> Result<SyncOutcome> {
        self.phase("Discover");
        self.check_cancelled()?;
        let tables = upstream.list_tables().await?;
        stats.tables_total = tables.len();
        info!("Discovered {} tables upstream", tables.len());

        let mut inspector = SchemaInspector::new();
        let enums = inspector.enum_catalog(&conn.client).await?.clone();
        let mut edges = Vec::new();
        for table in &tables {
            inspector.table_columns(&conn.client, &table.name).await?;
            edges.extend(
                inspector
                    .foreign_keys(&conn.client, &table.name)
                    .await?
                    .to_vec(),
            );
        }

        self.phase("Plan");
        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let table_plan = plan(&names, &edges);

        let analyses = match self.config.mode {
            RunMode::DryRun => {
                self.analyze(upstream, conn, &mut inspector, &enums, &tables, &table_plan, stats)
                    .await?
            }
            RunMode::Sync => {
                self.clear(conn, &table_plan).await?;
                self.sync(upstream, conn, &mut inspector, &enums, &tables, &table_plan, stats)
                    .await?;
                Vec::new()
            }
        };

        self.phase("Finalize");
        stats.finished_at = Some(Utc::now());

        if !stats.failed.is_empty() && self.config.enable_rollback {
            self.rollback(conn, &table_plan).await;
        }
        check_sync_failed(stats, self.config.continue_on_error)?;

        Ok(self.outcome_from(stats, analyses))
    }

    /// Clear phase: unconditional deletes in deletion order. A table that
    /// cannot be cleared is logged and skipped.
    async fn clear(&self, conn: &TargetConn, table_plan: &TablePlan) -> Result<()> {
        self.phase("Clear");
        for table in &table_plan.deletion_order {
            self.check_cancelled()?;
            let delete = format!("DELETE FROM {}", quote_ident(table));
            if let Err(e) = conn.client.execute(&delete, &[]).await {
                warn!("Could not clear table {}: {}", table, e);
            }
        }
        Ok(())
    }

    /// Sync phase: extract, transform, and load each table in insertion
    /// order.
    #[allow(clippy::too_many_arguments)]
    async fn sync(
        &self,
        upstream: &mut UpstreamClient,
        conn: &TargetConn,
        inspector: &mut SchemaInspector,
        enums: &EnumCatalog,
        tables: &[TableDescriptor],
        table_plan: &TablePlan,
        stats: &mut RunStats,
    ) -> Result<()> {
        self.phase("Sync");
        let total = table_plan.insertion_order.len();

        for (index, name) in table_plan.insertion_order.iter().enumerate() {
            self.check_cancelled()?;
            let Some(descriptor) = tables.iter().find(|t| &t.name == name) else {
                continue;
            };

            self.emit(ProgressEvent::TableStarted {
                table: name.clone(),
                index,
                total,
            });

            match self
                .sync_table(upstream, conn, inspector, enums, descriptor, stats)
                .await
            {
                Ok(rows) => {
                    stats.tables_success += 1;
                    self.emit(ProgressEvent::TableFinished {
                        table: name.clone(),
                        rows,
                        failed: false,
                    });
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e @ SyncError::SchemaInspection(_)) if !self.config.continue_on_error => {
                    // A dead connection masks every later result; bail out.
                    return Err(e);
                }
                Err(e) => {
                    warn!("Table {} failed: {}", name, e);
                    stats.record_failure(name.clone(), failure_kind(&e), e.to_string());
                    self.emit(ProgressEvent::TableFinished {
                        table: name.clone(),
                        rows: 0,
                        failed: true,
                    });
                }
            }
        }

        Ok(())
    }

    /// Sync one table; returns the number of inserted rows.
    async fn sync_table(
        &self,
        upstream: &mut UpstreamClient,
        conn: &TargetConn,
        inspector: &mut SchemaInspector,
        enums: &EnumCatalog,
        descriptor: &TableDescriptor,
        stats: &mut RunStats,
    ) -> Result<u64> {
        let planned = upstream.count_rows(descriptor.id).await;
        stats.rows_planned += planned;
        if planned == 0 {
            return Ok(0);
        }

        let columns = inspector
            .table_columns(&conn.client, &descriptor.name)
            .await?
            .to_vec();
        let primary_key = inspector
            .primary_key(&conn.client, &descriptor.name)
            .await?
            .to_vec();

        let mut transformer = Transformer::new(&columns, enums);
        let loader = Loader::new(LoadOptions {
            conflict_policy: self.config.conflict_policy,
            batch_size: self.config.batch_size,
            clear_first: false,
        });

        let mut inserted = 0u64;
        let mut extracted = 0i64;
        let mut page = 0usize;
        loop {
            self.check_cancelled()?;

            let (_columns, rows) = upstream
                .fetch_page(descriptor.id, page, self.config.batch_size)
                .await
                .map_err(|e| match e {
                    e @ SyncError::Extract { .. } => e,
                    other => SyncError::extract(&descriptor.name, other.to_string()),
                })?;
            let fetched = rows.len();
            extracted += fetched as i64;

            let transformed: Vec<Row> = rows
                .into_iter()
                .map(|row| transformer.transform_row(row))
                .collect();

            let result = loader
                .load(
                    &conn.client,
                    &descriptor.name,
                    &columns,
                    &primary_key,
                    transformed,
                )
                .await?;
            inserted += result.inserted_rows;
            for row_error in &result.errors {
                warn!(
                    "Row {} of {} rejected: {}",
                    row_error.index, descriptor.name, row_error.message
                );
            }

            if page_loop_done(fetched, self.config.batch_size, extracted, planned) {
                break;
            }
            page += 1;
        }

        stats.transform.merge(&transformer.stats());
        stats.rows_inserted += inserted;

        // Under skip/update the target engine legitimately drops or folds
        // rows; only the error policy demands an exact count.
        if self.config.conflict_policy == ConflictPolicy::Error && inserted != planned as u64 {
            return Err(SyncError::RowCountMismatch {
                table: descriptor.name.clone(),
                planned,
                inserted,
            });
        }

        Ok(inserted)
    }

    /// Dry-run analysis: sample each non-empty table and report projected
    /// transformations without touching the target.
    #[allow(clippy::too_many_arguments)]
    async fn analyze(
        &self,
        upstream: &mut UpstreamClient,
        conn: &TargetConn,
        inspector: &mut SchemaInspector,
        enums: &EnumCatalog,
        tables: &[TableDescriptor],
        table_plan: &TablePlan,
        stats: &mut RunStats,
    ) -> Result<Vec<TableAnalysis>> {
        self.phase("Analyze");
        let total = table_plan.insertion_order.len();
        let mut analyses = Vec::new();

        for (index, name) in table_plan.insertion_order.iter().enumerate() {
            self.check_cancelled()?;
            let Some(descriptor) = tables.iter().find(|t| &t.name == name) else {
                continue;
            };

            self.emit(ProgressEvent::TableStarted {
                table: name.clone(),
                index,
                total,
            });

            let planned = upstream.count_rows(descriptor.id).await;
            stats.rows_planned += planned;
            if planned == 0 {
                self.emit(ProgressEvent::TableFinished {
                    table: name.clone(),
                    rows: 0,
                    failed: false,
                });
                continue;
            }

            let columns = inspector
                .table_columns(&conn.client, name)
                .await?
                .to_vec();
            let schema_change = columns
                .iter()
                .any(|c| c.type_family == TypeFamily::Enum && enums.contains_key(&c.udt_name));

            let analysis = match upstream.fetch_page(descriptor.id, 0, DRY_RUN_SAMPLE).await {
                Ok((_, rows)) => {
                    let mut transformer = Transformer::new(&columns, enums);
                    let transformation_needed = rows
                        .iter()
                        .map(|row| transformer.validate_row(row).len())
                        .sum();
                    TableAnalysis {
                        table: name.clone(),
                        rows_sampled: rows.len(),
                        transformation_needed,
                        schema_change,
                        error: None,
                    }
                }
                Err(e) => TableAnalysis {
                    table: name.clone(),
                    rows_sampled: 0,
                    transformation_needed: 0,
                    schema_change,
                    error: Some(e.to_string()),
                },
            };

            analyses.push(analysis);
            stats.tables_success += 1;
            self.emit(ProgressEvent::TableFinished {
                table: name.clone(),
                rows: 0,
                failed: false,
            });
        }

        Ok(analyses)
    }

    /// Roll the target back to its pre-run state: delete every table in
    /// deletion order. Failures are warnings, never errors.
    async fn rollback(&self, conn: &TargetConn, table_plan: &TablePlan) {
        info!("Rolling back {} tables", table_plan.deletion_order.len());
        for table in &table_plan.deletion_order {
            let delete = format!("DELETE FROM {}", quote_ident(table));
            if let Err(e) = conn.client.execute(&delete, &[]).await {
                warn!("Rollback could not clear table {}: {}", table, e);
            }
        }
    }

    fn outcome_from(&self, stats: &RunStats, analyses: Vec<TableAnalysis>) -> SyncOutcome {
        let finished_at = stats.finished_at.unwrap_or_else(Utc::now);
        SyncOutcome {
            started_at: stats.started_at,
            finished_at,
            duration_seconds: stats.duration_seconds(),
            dry_run: self.config.mode == RunMode::DryRun,
            tables_total: stats.tables_total,
            tables_success: stats.tables_success,
            rows_planned: stats.rows_planned,
            rows_inserted: stats.rows_inserted,
            failed_tables: stats.failed.clone(),
            transform: stats.transform,
            analyses,
        }
    }

    fn phase(&self, name: &'static str) {
        info!("── {} ──", name);
        self.emit(ProgressEvent::PhaseStarted { name });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if let Some(rx) = &self.cancel {
            if *rx.borrow() {
                return Err(SyncError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Convert accrued per-table failures into a fatal sync-failed at
/// Finalize, unless the run is in continue-on-error mode.
fn check_sync_failed(stats: &RunStats, continue_on_error: bool) -> Result<()> {
    if stats.failed.is_empty() || continue_on_error {
        return Ok(());
    }
    Err(SyncError::SyncFailed {
        failed: stats.failed.len(),
        total: stats.tables_total,
    })
}

/// Map a table-level error to its failure kind.
fn failure_kind(error: &SyncError) -> FailureKind {
    match error {
        SyncError::SchemaInspection(_) => FailureKind::SchemaInspectionFailed,
        SyncError::Extract { .. } | SyncError::Http(_) => FailureKind::ExtractFailed,
        SyncError::SchemaMismatch { .. } => FailureKind::SchemaMismatch,
        SyncError::RowCountMismatch { .. } => FailureKind::RowCountMismatch,
        _ => FailureKind::InsertFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            failure_kind(&SyncError::extract("t", "boom")),
            FailureKind::ExtractFailed
        );
        assert_eq!(
            failure_kind(&SyncError::SchemaMismatch { table: "t".into() }),
            FailureKind::SchemaMismatch
        );
        assert_eq!(
            failure_kind(&SyncError::RowCountMismatch {
                table: "t".into(),
                planned: 3,
                inserted: 2
            }),
            FailureKind::RowCountMismatch
        );
        assert_eq!(
            failure_kind(&SyncError::insert("t", "boom")),
            FailureKind::InsertFailed
        );
        assert_eq!(
            failure_kind(&SyncError::SchemaInspection("gone".into())),
            FailureKind::SchemaInspectionFailed
        );
    }

    #[test]
    fn test_finalize_raises_sync_failed_on_table_failure() {
        // Two tables planned, the first succeeded, the second failed.
        let mut stats = RunStats::begin();
        stats.tables_total = 2;
        stats.tables_success = 1;
        stats.record_failure("orders", FailureKind::InsertFailed, "insert failed");

        let err = check_sync_failed(&stats, false).unwrap_err();
        assert!(matches!(
            err,
            SyncError::SyncFailed {
                failed: 1,
                total: 2
            }
        ));
    }

    #[test]
    fn test_finalize_tolerates_failures_in_continue_on_error_mode() {
        let mut stats = RunStats::begin();
        stats.tables_total = 2;
        stats.tables_success = 1;
        stats.record_failure("orders", FailureKind::InsertFailed, "insert failed");

        assert!(check_sync_failed(&stats, true).is_ok());
    }

    #[test]
    fn test_finalize_passes_a_clean_run() {
        let mut stats = RunStats::begin();
        stats.tables_total = 2;
        stats.tables_success = 2;

        assert!(check_sync_failed(&stats, false).is_ok());
    }

    #[test]
    fn test_outcome_succeeded() {
        let outcome = SyncOutcome {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_seconds: 0.0,
            dry_run: false,
            tables_total: 2,
            tables_success: 2,
            rows_planned: 10,
            rows_inserted: 10,
            failed_tables: Vec::new(),
            transform: TransformStats::default(),
            analyses: Vec::new(),
        };
        assert!(outcome.succeeded());
    }
}
