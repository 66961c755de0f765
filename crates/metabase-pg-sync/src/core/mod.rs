//! Core data types shared across the replication pipeline.

pub mod stats;
pub mod value;

pub use stats::{FailureKind, RunStats, TableFailure, TransformStats};
pub use value::{Batch, Row, Value};
