//! # metabase-pg-sync
//!
//! Replicate the contents of a Metabase-fronted database into a locally
//! administered PostgreSQL instance, table by table, as an all-or-nothing
//! transaction.
//!
//! The engine discovers tables and their foreign-key relationships through
//! the Metabase metadata API, computes a safe load order, streams rows
//! through a paged extract / transform / batched-insert pipeline, and rolls
//! the target back if any table fails.
//!
//! ## Example
//!
//! ```rust,no_run
//! use metabase_pg_sync::{Executor, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> metabase_pg_sync::Result<()> {
//!     let config = RunConfig::from_env()?;
//!     let outcome = Executor::new(config).run().await?;
//!     println!("Synchronized {} rows", outcome.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod loader;
pub mod plan;
pub mod schema;
pub mod target;
pub mod transform;
pub mod upstream;

// Re-exports for convenient access
pub use config::{ConflictPolicy, LogLevel, RunConfig, RunMode};
pub use crate::core::stats::{FailureKind, RunStats, TableFailure, TransformStats};
pub use crate::core::value::{Batch, Row, Value};
pub use error::{Result, SyncError};
pub use executor::{Executor, ProgressEvent, SyncOutcome, TableAnalysis};
pub use loader::{LoadOptions, LoadResult, Loader, RowError};
pub use plan::TablePlan;
pub use schema::{ColumnMeta, EnumCatalog, ForeignKeyEdge, SchemaInspector, TypeFamily};
pub use transform::{TransformIssue, Transformer};
pub use upstream::{FieldDescriptor, TableDescriptor, UpstreamClient};
