//! Target schema inspection with per-run memoization.
//!
//! Individual catalog queries that fail are logged at WARN and yield empty
//! results so they do not mask a later, clearer error; only an unusable
//! connection is fatal.

use std::collections::{BTreeMap, HashMap};

use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Declared SQL type family of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Numeric,
    Boolean,
    Temporal,
    Text,
    Json,
    /// User-defined enum; the type name is the column's `udt_name`.
    Enum,
    Other,
}

/// Column metadata for one target column.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,

    /// Declared type family.
    pub type_family: TypeFamily,

    /// Underlying type name (enum name for user-defined enums).
    pub udt_name: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether a default expression is declared.
    pub has_default: bool,
}

/// Mapping from enum type name to its ordered label list.
pub type EnumCatalog = BTreeMap<String, Vec<String>>;

/// A foreign-key edge: dependent table references another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyEdge {
    /// Dependent table.
    pub table: String,

    /// Referenced table.
    pub references: String,
}

/// Classify an `information_schema` type pair into a family.
pub fn classify_type(data_type: &str, udt_name: &str) -> TypeFamily {
    match data_type.to_lowercase().as_str() {
        "smallint" | "integer" | "bigint" => TypeFamily::Integer,
        "numeric" | "decimal" | "real" | "double precision" => TypeFamily::Numeric,
        "boolean" => TypeFamily::Boolean,
        "date"
        | "timestamp without time zone"
        | "timestamp with time zone"
        | "time without time zone"
        | "time with time zone" => TypeFamily::Temporal,
        "text" | "character varying" | "character" => TypeFamily::Text,
        "json" | "jsonb" => TypeFamily::Json,
        "user-defined" => {
            // Non-enum user-defined types fall through to Other at transform
            // time when the catalog has no entry for the udt name.
            if udt_name.is_empty() {
                TypeFamily::Other
            } else {
                TypeFamily::Enum
            }
        }
        _ => TypeFamily::Other,
    }
}

/// Schema inspector with in-process memoization keyed per table.
///
/// The inspector borrows the Executor's connection for each query; caches
/// live for exactly one run unless [`reset`](SchemaInspector::reset) is
/// called.
#[derive(Default)]
pub struct SchemaInspector {
    columns: HashMap<String, Vec<ColumnMeta>>,
    foreign_keys: HashMap<String, Vec<ForeignKeyEdge>>,
    primary_keys: HashMap<String, Vec<String>>,
    enums: Option<EnumCatalog>,
    tables: Option<Vec<String>>,
}

impl SchemaInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached result.
    pub fn reset(&mut self) {
        self.columns.clear();
        self.foreign_keys.clear();
        self.primary_keys.clear();
        self.enums = None;
        self.tables = None;
    }

    /// Enum catalog of the target: enum type name to ordered labels.
    pub async fn enum_catalog(&mut self, client: &Client) -> Result<&EnumCatalog> {
        if self.enums.is_none() {
            let query = r#"
                SELECT t.typname, e.enumlabel
                FROM pg_catalog.pg_type t
                JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid
                ORDER BY t.typname, e.enumsortorder
            "#;

            let mut catalog = EnumCatalog::new();
            match client.query(query, &[]).await {
                Ok(rows) => {
                    for row in rows {
                        let name: String = row.get(0);
                        let label: String = row.get(1);
                        catalog.entry(name).or_insert_with(Vec::new).push(label);
                    }
                    debug!("Loaded {} enum types from target", catalog.len());
                }
                Err(e) => self.tolerate("enum catalog", e)?,
            }
            self.enums = Some(catalog);
        }

        Ok(self.enums.as_ref().unwrap())
    }

    /// Column metadata for a table, in declared positional order.
    pub async fn table_columns(&mut self, client: &Client, table: &str) -> Result<&[ColumnMeta]> {
        if !self.columns.contains_key(table) {
            let query = r#"
                SELECT column_name,
                       data_type,
                       udt_name,
                       CASE WHEN is_nullable = 'YES' THEN true ELSE false END,
                       column_default IS NOT NULL
                FROM information_schema.columns
                WHERE table_schema = 'public' AND table_name = $1
                ORDER BY ordinal_position
            "#;

            let mut columns = Vec::new();
            match client.query(query, &[&table]).await {
                Ok(rows) => {
                    for row in rows {
                        let data_type: String = row.get(1);
                        let udt_name: String = row.get(2);
                        columns.push(ColumnMeta {
                            name: row.get(0),
                            type_family: classify_type(&data_type, &udt_name),
                            udt_name,
                            is_nullable: row.get(3),
                            has_default: row.get(4),
                        });
                    }
                    debug!("Loaded {} columns for {}", columns.len(), table);
                }
                Err(e) => self.tolerate(&format!("columns of {}", table), e)?,
            }
            self.columns.insert(table.to_string(), columns);
        }

        Ok(&self.columns[table])
    }

    /// Foreign-key edges out of a table, public namespace only.
    pub async fn foreign_keys(&mut self, client: &Client, table: &str) -> Result<&[ForeignKeyEdge]> {
        if !self.foreign_keys.contains_key(table) {
            let query = r#"
                SELECT DISTINCT ccu.table_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.constraint_column_usage ccu
                  ON ccu.constraint_name = tc.constraint_name
                 AND ccu.constraint_schema = tc.constraint_schema
                WHERE tc.constraint_type = 'FOREIGN KEY'
                  AND tc.table_schema = 'public'
                  AND tc.table_name = $1
                ORDER BY ccu.table_name
            "#;

            let mut edges = Vec::new();
            match client.query(query, &[&table]).await {
                Ok(rows) => {
                    for row in rows {
                        edges.push(ForeignKeyEdge {
                            table: table.to_string(),
                            references: row.get(0),
                        });
                    }
                }
                Err(e) => self.tolerate(&format!("foreign keys of {}", table), e)?,
            }
            self.foreign_keys.insert(table.to_string(), edges);
        }

        Ok(&self.foreign_keys[table])
    }

    /// Primary-key column names of a table, in key order.
    pub async fn primary_key(&mut self, client: &Client, table: &str) -> Result<&[String]> {
        if !self.primary_keys.contains_key(table) {
            let query = r#"
                SELECT kcu.column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON kcu.constraint_name = tc.constraint_name
                 AND kcu.constraint_schema = tc.constraint_schema
                WHERE tc.constraint_type = 'PRIMARY KEY'
                  AND tc.table_schema = 'public'
                  AND tc.table_name = $1
                ORDER BY kcu.ordinal_position
            "#;

            let mut columns = Vec::new();
            match client.query(query, &[&table]).await {
                Ok(rows) => {
                    for row in rows {
                        columns.push(row.get(0));
                    }
                }
                Err(e) => self.tolerate(&format!("primary key of {}", table), e)?,
            }
            self.primary_keys.insert(table.to_string(), columns);
        }

        Ok(&self.primary_keys[table])
    }

    /// All base tables in the public namespace.
    pub async fn table_list(&mut self, client: &Client) -> Result<&[String]> {
        if self.tables.is_none() {
            let query = r#"
                SELECT table_name
                FROM information_schema.tables
                WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
                ORDER BY table_name
            "#;

            let mut tables = Vec::new();
            match client.query(query, &[]).await {
                Ok(rows) => {
                    for row in rows {
                        tables.push(row.get(0));
                    }
                }
                Err(e) => self.tolerate("table list", e)?,
            }
            self.tables = Some(tables);
        }

        Ok(self.tables.as_deref().unwrap())
    }

    /// A broken connection is fatal; anything else degrades to an empty
    /// result.
    fn tolerate(&self, what: &str, e: tokio_postgres::Error) -> Result<()> {
        if e.is_closed() {
            return Err(SyncError::SchemaInspection(format!(
                "connection lost while reading {}: {}",
                what, e
            )));
        }
        warn!("Schema query for {} failed, treating as empty: {}", what, e);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_integer_family() {
        assert_eq!(classify_type("integer", "int4"), TypeFamily::Integer);
        assert_eq!(classify_type("bigint", "int8"), TypeFamily::Integer);
        assert_eq!(classify_type("smallint", "int2"), TypeFamily::Integer);
    }

    #[test]
    fn test_classify_numeric_family() {
        assert_eq!(classify_type("numeric", "numeric"), TypeFamily::Numeric);
        assert_eq!(classify_type("double precision", "float8"), TypeFamily::Numeric);
        assert_eq!(classify_type("real", "float4"), TypeFamily::Numeric);
    }

    #[test]
    fn test_classify_temporal_family() {
        assert_eq!(
            classify_type("timestamp without time zone", "timestamp"),
            TypeFamily::Temporal
        );
        assert_eq!(
            classify_type("timestamp with time zone", "timestamptz"),
            TypeFamily::Temporal
        );
        assert_eq!(classify_type("date", "date"), TypeFamily::Temporal);
    }

    #[test]
    fn test_classify_text_json_boolean() {
        assert_eq!(classify_type("text", "text"), TypeFamily::Text);
        assert_eq!(classify_type("character varying", "varchar"), TypeFamily::Text);
        assert_eq!(classify_type("jsonb", "jsonb"), TypeFamily::Json);
        assert_eq!(classify_type("json", "json"), TypeFamily::Json);
        assert_eq!(classify_type("boolean", "bool"), TypeFamily::Boolean);
    }

    #[test]
    fn test_classify_user_defined_as_enum() {
        assert_eq!(classify_type("USER-DEFINED", "status_enum"), TypeFamily::Enum);
    }

    #[test]
    fn test_classify_unknown_as_other() {
        assert_eq!(classify_type("uuid", "uuid"), TypeFamily::Other);
        assert_eq!(classify_type("bytea", "bytea"), TypeFamily::Other);
        assert_eq!(classify_type("ARRAY", "_int4"), TypeFamily::Other);
    }
}
