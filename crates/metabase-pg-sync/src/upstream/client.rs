//! HTTP session client for the upstream API.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::types::{
    DatasetRequest, DatasetResponse, MetadataResponse, SessionRequest, SessionResponse,
    TableDescriptor,
};
use crate::config::RunConfig;
use crate::core::value::{Row, Value};
use crate::error::{Result, SyncError};

/// Session header carried on every authenticated call. The name is part of
/// the upstream contract and must not change.
pub const SESSION_HEADER: &str = "X-Metabase-Session";

/// Client for the upstream metadata-and-query API.
///
/// All operations are idempotent from the client's perspective; the session
/// token is written once by [`authenticate`](UpstreamClient::authenticate)
/// and read-only afterwards.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    database_id: i64,
    username: String,
    password: String,
    token: Option<String>,
    count_fallbacks: u64,
}

impl UpstreamClient {
    /// Build a client from the run configuration.
    pub fn new(config: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            database_id: config.upstream_database_id,
            username: config.upstream_username.clone(),
            password: config.upstream_password.clone(),
            token: None,
            count_fallbacks: 0,
        })
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| SyncError::Auth("no active session".into()))
    }

    /// Exchange credentials for an opaque session token.
    pub async fn authenticate(&mut self) -> Result<()> {
        let url = format!("{}/api/session", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&SessionRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SyncError::Auth(format!(
                "upstream rejected credentials ({})",
                status
            )));
        }

        let session: SessionResponse = response.json().await?;
        self.token = Some(session.id);
        info!("Authenticated against {}", self.base_url);
        Ok(())
    }

    /// Enumerate every table visible to the session in the configured
    /// database, preserving the server's discovery order.
    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let url = format!(
            "{}/api/database/{}/metadata",
            self.base_url, self.database_id
        );
        let response = self
            .http
            .get(&url)
            .header(SESSION_HEADER, self.token()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::extract(
                "<metadata>",
                format!("metadata request failed ({})", response.status()),
            ));
        }

        let metadata: MetadataResponse = response.json().await?;
        debug!("Discovered {} upstream tables", metadata.tables.len());
        Ok(metadata.tables)
    }

    /// Total row count for a table via an aggregate query.
    ///
    /// A failed count is recoverable: the fetch loop still terminates on the
    /// short-page rule, so the error is recorded and 0 returned.
    pub async fn count_rows(&mut self, table_id: i64) -> i64 {
        match self.try_count_rows(table_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Row count for table {} failed: {}", table_id, e);
                self.count_fallbacks += 1;
                0
            }
        }
    }

    async fn try_count_rows(&self, table_id: i64) -> Result<i64> {
        let response = self
            .dataset(&DatasetRequest::count(self.database_id, table_id))
            .await?;

        let count = response
            .data
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        Ok(count)
    }

    /// Fetch one page of rows. `page` is 0-based here; the wire format is
    /// 1-based.
    pub async fn fetch_page(
        &self,
        table_id: i64,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<String>, Vec<Row>)> {
        let request = DatasetRequest::rows(self.database_id, table_id, page + 1, limit);
        let response = self.dataset(&request).await?;

        let columns: Vec<String> = response.data.cols.into_iter().map(|c| c.name).collect();
        let rows = response
            .data
            .rows
            .into_iter()
            .map(|raw| {
                Row::from_pairs(
                    columns
                        .iter()
                        .cloned()
                        .zip(raw.into_iter().map(Value::from_json))
                        .collect(),
                )
            })
            .collect();

        Ok((columns, rows))
    }

    async fn dataset(&self, request: &DatasetRequest) -> Result<DatasetResponse> {
        let url = format!("{}/api/dataset", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(SESSION_HEADER, self.token()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::extract(
                format!("table {}", request.query.source_table),
                format!("dataset request failed ({})", response.status()),
            ));
        }

        Ok(response.json().await?)
    }

    /// Best-effort session termination; errors are swallowed.
    pub async fn logout(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        let url = format!("{}/api/session", self.base_url);
        match self
            .http
            .delete(&url)
            .header(SESSION_HEADER, token)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                debug!("Upstream session closed");
            }
            Ok(response) => debug!("Upstream logout returned {}", response.status()),
            Err(e) => debug!("Upstream logout failed: {}", e),
        }
    }

    /// Number of count queries that fell back to 0.
    pub fn count_fallbacks(&self) -> u64 {
        self.count_fallbacks
    }
}

/// Whether the page fetch loop for a table is finished.
///
/// Paging stops on a short page, or once the cumulative extracted rows reach
/// the planned count (when the count is known).
pub(crate) fn page_loop_done(rows_in_page: usize, limit: usize, extracted: i64, planned: i64) -> bool {
    rows_in_page < limit || (planned > 0 && extracted >= planned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_header_name_is_bit_exact() {
        assert_eq!(SESSION_HEADER, "X-Metabase-Session");
    }

    #[test]
    fn test_page_loop_terminates_on_short_page() {
        assert!(page_loop_done(999, 1000, 999, 5000));
        assert!(!page_loop_done(1000, 1000, 1000, 5000));
    }

    #[test]
    fn test_page_loop_terminates_on_planned_count() {
        assert!(page_loop_done(1000, 1000, 5000, 5000));
        assert!(page_loop_done(1000, 1000, 6000, 5000));
    }

    #[test]
    fn test_page_loop_ignores_unknown_count() {
        // A failed count reports 0; only the short-page rule applies then.
        assert!(!page_loop_done(1000, 1000, 3000, 0));
        assert!(page_loop_done(0, 1000, 3000, 0));
    }
}
