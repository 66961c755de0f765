//! Configuration validation.

use super::RunConfig;
use crate::error::{Result, SyncError};

/// Validate bounds that survive parsing.
pub fn validate(config: &RunConfig) -> Result<()> {
    if config.upstream_database_id <= 0 {
        return Err(SyncError::Config(
            "UPSTREAM_DATABASE_ID must be a positive integer".into(),
        ));
    }

    if config.target_port == 0 {
        return Err(SyncError::Config(
            "TARGET_PORT must be between 1 and 65535".into(),
        ));
    }

    if config.connect_timeout_ms < 1000 {
        return Err(SyncError::Config(
            "CONNECT_TIMEOUT_MS must be at least 1000".into(),
        ));
    }

    if config.batch_size == 0 {
        return Err(SyncError::Config("BATCH_SIZE must be at least 1".into()));
    }

    Ok(())
}
