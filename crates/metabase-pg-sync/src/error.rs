//! Error types for the replication library.

use thiserror::Error;

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (missing env var, bad bounds, unknown option).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream credentials were rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Target unreachable after retries, or the bootstrap create failed.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Target connection became unusable while inspecting the schema.
    #[error("Schema inspection failed: {0}")]
    SchemaInspection(String),

    /// Upstream API error during a page fetch.
    #[error("Extract failed for table {table}: {message}")]
    Extract { table: String, message: String },

    /// No incoming column matched any target column.
    #[error("Schema mismatch for table {table}: no usable columns")]
    SchemaMismatch { table: String },

    /// Connection-level insert error.
    #[error("Insert failed for table {table}: {message}")]
    Insert { table: String, message: String },

    /// Inserted row count diverged from the planned count.
    #[error("Row count mismatch for table {table}: planned {planned}, inserted {inserted}")]
    RowCountMismatch {
        table: String,
        planned: i64,
        inserted: u64,
    },

    /// One or more tables failed and the run was not in continue-on-error mode.
    #[error("Synchronization failed: {failed} of {total} tables failed")]
    SyncFailed { failed: usize, total: usize },

    /// Upstream HTTP transport error.
    #[error("Upstream API error: {0}")]
    Http(#[from] reqwest::Error),

    /// Target database driver error.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Run cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create an Extract error.
    pub fn extract(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Extract {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an Insert error.
    pub fn insert(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Insert {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, SyncError>;
