//! Batched inserts into the target with conflict policy and per-row
//! fallback.
//!
//! A failed batch is never declared lost: the same statement re-runs one
//! row at a time so poison rows are isolated without forfeiting good ones.
//! The Loader throws only for connection-level faults and for an empty
//! effective column set.

use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::config::ConflictPolicy;
use crate::core::value::{Batch, Row, Value};
use crate::error::{Result, SyncError};
use crate::schema::ColumnMeta;

/// Loader options for one table.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Conflict policy for the insert statements.
    pub conflict_policy: ConflictPolicy,

    /// Rows per insert statement.
    pub batch_size: usize,

    /// Issue an unconditional full delete before loading.
    pub clear_first: bool,
}

/// A row that failed during the per-row fallback.
#[derive(Debug, Clone)]
pub struct RowError {
    /// Index of the row within the load call.
    pub index: usize,

    /// Driver error message.
    pub message: String,
}

/// Outcome of loading one table's rows.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Rows actually inserted.
    pub inserted_rows: u64,

    /// Rows handed to the loader.
    pub total_rows: usize,

    /// Number of insert statements issued (excluding fallback re-runs).
    pub batches: usize,

    /// Per-row errors collected by the fallback.
    pub errors: Vec<RowError>,
}

/// Batch loader for a single target table.
pub struct Loader {
    options: LoadOptions,
}

impl Loader {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    /// Load rows into `table`.
    ///
    /// `columns` is the table's metadata in declared order; `primary_key`
    /// feeds the conflict target of the `update` policy.
    pub async fn load(
        &self,
        client: &Client,
        table: &str,
        columns: &[ColumnMeta],
        primary_key: &[String],
        rows: Vec<Row>,
    ) -> Result<LoadResult> {
        let mut result = LoadResult {
            total_rows: rows.len(),
            ..Default::default()
        };

        if self.options.clear_first {
            let delete = format!("DELETE FROM {}", quote_ident(table));
            client
                .execute(&delete, &[])
                .await
                .map_err(|e| SyncError::insert(table, format!("clearing table: {}", e)))?;
        }

        if rows.is_empty() {
            return Ok(result);
        }

        let batch = Batch::new(rows);
        let effective = effective_columns(columns, &batch);
        if effective.is_empty() {
            return Err(SyncError::SchemaMismatch {
                table: table.to_string(),
            });
        }

        let conflict_target = conflict_target(primary_key, &effective);
        if self.options.conflict_policy == ConflictPolicy::Update && conflict_target.is_empty() {
            warn!(
                "Table {} has no usable conflict target; update policy degrades to skip",
                table
            );
        }

        let mut offset = 0usize;
        for chunk in batch.rows.chunks(self.options.batch_size.max(1)) {
            let statement = build_insert(
                table,
                &effective,
                chunk.len(),
                self.options.conflict_policy,
                &conflict_target,
            );
            let values = bind_rows(chunk, &effective);
            assert_eq!(
                values.len(),
                effective.len() * chunk.len(),
                "parameter count must match placeholder count"
            );
            let params: Vec<&(dyn ToSql + Sync)> =
                values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

            result.batches += 1;
            match client.execute(&statement, &params).await {
                Ok(n) => result.inserted_rows += n,
                Err(e) if e.is_closed() => {
                    return Err(SyncError::insert(table, e.to_string()));
                }
                Err(e) => {
                    debug!(
                        "Batch insert into {} failed ({}); falling back to row-at-a-time",
                        table, e
                    );
                    self.fallback_rows(
                        client,
                        table,
                        chunk,
                        &effective,
                        &conflict_target,
                        offset,
                        &mut result,
                    )
                    .await?;
                }
            }
            offset += chunk.len();
        }

        Ok(result)
    }

    /// Re-execute a failed batch one row at a time with the identical
    /// conflict suffix, collecting per-row errors.
    #[allow(clippy::too_many_arguments)]
    async fn fallback_rows(
        &self,
        client: &Client,
        table: &str,
        chunk: &[Row],
        effective: &[String],
        conflict_target: &[String],
        offset: usize,
        result: &mut LoadResult,
    ) -> Result<()> {
        let statement = build_insert(
            table,
            effective,
            1,
            self.options.conflict_policy,
            conflict_target,
        );

        for (i, row) in chunk.iter().enumerate() {
            let values = bind_rows(std::slice::from_ref(row), effective);
            let params: Vec<&(dyn ToSql + Sync)> =
                values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

            match client.execute(&statement, &params).await {
                Ok(n) => result.inserted_rows += n,
                Err(e) if e.is_closed() => {
                    return Err(SyncError::insert(table, e.to_string()));
                }
                Err(e) => result.errors.push(RowError {
                    index: offset + i,
                    message: e.to_string(),
                }),
            }
        }

        Ok(())
    }
}

/// Quote a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The effective column set: target columns, in declared order, restricted
/// to those present in any row of the batch.
pub fn effective_columns(target: &[ColumnMeta], batch: &Batch) -> Vec<String> {
    target
        .iter()
        .filter(|c| batch.columns.iter().any(|b| b == &c.name))
        .map(|c| c.name.clone())
        .collect()
}

/// Conflict target for the `update` policy: the primary-key columns that
/// are also effective.
fn conflict_target(primary_key: &[String], effective: &[String]) -> Vec<String> {
    primary_key
        .iter()
        .filter(|pk| effective.contains(pk))
        .cloned()
        .collect()
}

/// Build a parameterized multi-row insert statement with sequentially
/// numbered placeholders.
pub fn build_insert(
    table: &str,
    columns: &[String],
    row_count: usize,
    policy: ConflictPolicy,
    conflict_target: &[String],
) -> String {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let mut placeholder = 1usize;
    let mut tuples: Vec<String> = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let slots: Vec<String> = columns
            .iter()
            .map(|_| {
                let slot = format!("${}", placeholder);
                placeholder += 1;
                slot
            })
            .collect();
        tuples.push(format!("({})", slots.join(", ")));
    }

    let mut statement = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        col_list.join(", "),
        tuples.join(", ")
    );

    match policy {
        ConflictPolicy::Error => {}
        ConflictPolicy::Skip => statement.push_str(" ON CONFLICT DO NOTHING"),
        ConflictPolicy::Update => {
            let assignments: Vec<String> = columns
                .iter()
                .filter(|c| !conflict_target.contains(c))
                .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
                .collect();

            if conflict_target.is_empty() || assignments.is_empty() {
                statement.push_str(" ON CONFLICT DO NOTHING");
            } else {
                let target_list: Vec<String> =
                    conflict_target.iter().map(|c| quote_ident(c)).collect();
                statement.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    target_list.join(", "),
                    assignments.join(", ")
                ));
            }
        }
    }

    statement
}

/// Flatten rows into row-major parameter order over the effective columns.
///
/// Missing keys become null; empty strings are normalized to null.
pub fn bind_rows(rows: &[Row], effective: &[String]) -> Vec<Value> {
    let mut values = Vec::with_capacity(rows.len() * effective.len());
    for row in rows {
        for column in effective {
            let value = match row.get(column) {
                None | Some(Value::Null) => Value::Null,
                Some(Value::Text(s)) if s.is_empty() => Value::Null,
                Some(v) => v.clone(),
            };
            values.push(value);
        }
    }
    values
}
