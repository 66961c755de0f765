//! Wire types for the upstream Metabase API.

use serde::{Deserialize, Serialize};

/// Semantic type tag Metabase assigns to primary-key fields.
const SEMANTIC_PK: &str = "type/PK";

/// A table visible to the upstream session.
#[derive(Debug, Clone, Deserialize)]
pub struct TableDescriptor {
    /// Stable upstream id.
    pub id: i64,

    /// Logical table name.
    pub name: String,

    /// Ordered field list.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

/// A field of an upstream table.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,

    /// Upstream base type tag (e.g. "type/Integer").
    #[serde(default)]
    pub base_type: Option<String>,

    /// Semantic role (e.g. "type/PK").
    #[serde(default)]
    pub semantic_type: Option<String>,
}

impl FieldDescriptor {
    /// Whether the upstream marks this field as a primary key.
    pub fn is_primary_key(&self) -> bool {
        self.semantic_type.as_deref() == Some(SEMANTIC_PK)
    }
}

/// `POST /api/session` request body.
#[derive(Debug, Serialize)]
pub(crate) struct SessionRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// `POST /api/session` response body.
#[derive(Debug, Deserialize)]
pub(crate) struct SessionResponse {
    pub id: String,
}

/// `GET /api/database/{id}/metadata` response body.
#[derive(Debug, Deserialize)]
pub(crate) struct MetadataResponse {
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

/// `POST /api/dataset` request body.
#[derive(Debug, Serialize)]
pub(crate) struct DatasetRequest {
    pub database: i64,

    #[serde(rename = "type")]
    pub query_type: &'static str,

    pub query: DatasetQuery,
}

/// The inner MBQL query of a dataset request.
#[derive(Debug, Serialize)]
pub(crate) struct DatasetQuery {
    #[serde(rename = "source-table")]
    pub source_table: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Vec<Vec<&'static str>>>,
}

/// Page selector of a dataset request. Pages are 1-based.
#[derive(Debug, Serialize)]
pub(crate) struct PageSpec {
    pub page: usize,
    pub items: usize,
}

impl DatasetRequest {
    /// A paged row query.
    pub fn rows(database: i64, table: i64, page: usize, items: usize) -> Self {
        Self {
            database,
            query_type: "query",
            query: DatasetQuery {
                source_table: table,
                limit: Some(items),
                page: Some(PageSpec { page, items }),
                aggregation: None,
            },
        }
    }

    /// A COUNT(*) aggregate query.
    pub fn count(database: i64, table: i64) -> Self {
        Self {
            database,
            query_type: "query",
            query: DatasetQuery {
                source_table: table,
                limit: None,
                page: None,
                aggregation: Some(vec![vec!["count"]]),
            },
        }
    }
}

/// `POST /api/dataset` response body, reduced to the fields the engine uses.
#[derive(Debug, Deserialize)]
pub(crate) struct DatasetResponse {
    pub data: DatasetData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatasetData {
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,

    #[serde(default)]
    pub cols: Vec<DatasetColumn>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatasetColumn {
    pub name: String,
}
