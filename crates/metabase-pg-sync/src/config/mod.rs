//! Configuration loading and validation.
//!
//! Options come from environment variables; `from_vars` takes a plain map so
//! tests never touch process environment.

mod types;
mod validation;

pub use types::*;

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Result, SyncError};

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    match vars.get(key) {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(SyncError::Config(format!("{} is required", key))),
    }
}

fn optional<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn parse_with<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| SyncError::Config(format!("{}: {}", key, e)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(SyncError::Config(format!(
            "{}: invalid boolean '{}'",
            key, other
        ))),
    }
}

impl RunConfig {
    /// Assemble a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Assemble a configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let upstream_database_id = parse_with::<i64>(
            "UPSTREAM_DATABASE_ID",
            &required(vars, "UPSTREAM_DATABASE_ID")?,
        )?;

        let target_port =
            parse_with::<u16>("TARGET_PORT", &required(vars, "TARGET_PORT")?)?;

        let config = RunConfig {
            upstream_base_url: required(vars, "UPSTREAM_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            upstream_database_id,
            upstream_username: required(vars, "UPSTREAM_USERNAME")?,
            upstream_password: required(vars, "UPSTREAM_PASSWORD")?,
            target_host: required(vars, "TARGET_HOST")?,
            target_port,
            target_name: required(vars, "TARGET_NAME")?,
            target_username: required(vars, "TARGET_USERNAME")?,
            target_password: required(vars, "TARGET_PASSWORD")?,
            target_tls_enabled: match optional(vars, "TARGET_TLS_ENABLED") {
                Some(raw) => parse_bool("TARGET_TLS_ENABLED", raw)?,
                None => false,
            },
            connect_timeout_ms: match optional(vars, "CONNECT_TIMEOUT_MS") {
                Some(raw) => parse_with::<u64>("CONNECT_TIMEOUT_MS", raw)?,
                None => 30_000,
            },
            batch_size: match optional(vars, "BATCH_SIZE") {
                Some(raw) => parse_with::<usize>("BATCH_SIZE", raw)?,
                None => 1000,
            },
            log_level: match optional(vars, "LOG_LEVEL") {
                Some(raw) => parse_with::<LogLevel>("LOG_LEVEL", raw)?,
                None => LogLevel::Info,
            },
            conflict_policy: match optional(vars, "CONFLICT_POLICY") {
                Some(raw) => parse_with::<ConflictPolicy>("CONFLICT_POLICY", raw)?,
                None => ConflictPolicy::Error,
            },
            enable_rollback: match optional(vars, "ENABLE_ROLLBACK") {
                Some(raw) => parse_bool("ENABLE_ROLLBACK", raw)?,
                None => true,
            },
            continue_on_error: match optional(vars, "CONTINUE_ON_ERROR") {
                Some(raw) => parse_bool("CONTINUE_ON_ERROR", raw)?,
                None => false,
            },
            mode: match optional(vars, "MODE") {
                Some(raw) => parse_with::<RunMode>("MODE", raw)?,
                None => RunMode::Sync,
            },
        };

        // continue_on_error always wins over an explicit ENABLE_ROLLBACK.
        let config = if config.continue_on_error {
            RunConfig {
                enable_rollback: false,
                ..config
            }
        } else {
            config
        };

        validation::validate(&config)?;
        Ok(config)
    }
}
