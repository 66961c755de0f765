//! Upstream Metabase API client.
//!
//! The upstream exposes no streaming primitive, so extraction falls back to
//! offset/limit paging over the dataset query endpoint.

mod client;
mod types;

pub use client::{UpstreamClient, SESSION_HEADER};
pub use types::{FieldDescriptor, TableDescriptor};

pub(crate) use client::page_loop_done;
