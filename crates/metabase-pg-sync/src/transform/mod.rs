//! Row transformation: enum label remapping and type-family coercion.
//!
//! The Transformer is the only component that constructs `Value` variants
//! the upstream decoder does not produce. Coercion failures are counted,
//! never raised.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::core::stats::TransformStats;
use crate::core::value::{Row, Value};
use crate::schema::{ColumnMeta, EnumCatalog, TypeFamily};

/// Domain-agnostic aliases consulted after the direct matching rules.
/// The mapped label is used only when the catalog actually declares it.
const SYNONYMS: &[(&str, &str)] = &[
    ("activity", "INDIVIDUAL"),
    ("active", "ACTIVE"),
    ("inactive", "INACTIVE"),
    ("yes", "TRUE"),
    ("no", "FALSE"),
];

/// Textual forms accepted as boolean true.
const TRUE_FORMS: &[&str] = &["true", "1", "yes", "on", "t", "y"];

/// Textual forms accepted as boolean false.
const FALSE_FORMS: &[&str] = &["false", "0", "no", "off", "f", "n"];

/// An issue found while validating a row in dry-run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformIssue {
    /// Column the issue applies to.
    pub column: String,

    /// What would change.
    pub message: String,
}

/// Per-table row transformer.
pub struct Transformer<'a> {
    columns: HashMap<&'a str, &'a ColumnMeta>,
    enums: &'a EnumCatalog,
    stats: TransformStats,
}

impl<'a> Transformer<'a> {
    /// Build a transformer for one table's column set and the run's enum
    /// catalog.
    pub fn new(columns: &'a [ColumnMeta], enums: &'a EnumCatalog) -> Self {
        Self {
            columns: columns.iter().map(|c| (c.name.as_str(), c)).collect(),
            enums,
            stats: TransformStats::default(),
        }
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> TransformStats {
        self.stats
    }

    /// Coerce every column of a row to its target type family.
    ///
    /// Columns with no target counterpart pass through unchanged; the Loader
    /// drops them.
    pub fn transform_row(&mut self, mut row: Row) -> Row {
        for (name, value) in row.iter_mut() {
            let Some(column) = self.columns.get(name.as_str()).copied() else {
                continue;
            };
            let current = std::mem::replace(value, Value::Null);
            let (next, _issue) = self.transform_value(column, current);
            *value = next;
        }
        row
    }

    /// Run the cascade without mutating the row, reporting what would
    /// change.
    pub fn validate_row(&mut self, row: &Row) -> Vec<TransformIssue> {
        let mut issues = Vec::new();
        for (name, value) in row.iter() {
            let Some(column) = self.columns.get(name.as_str()).copied() else {
                continue;
            };
            let (_next, issue) = self.transform_value(column, value.clone());
            if let Some(message) = issue {
                issues.push(TransformIssue {
                    column: name.clone(),
                    message,
                });
            }
        }
        issues
    }

    /// Transform a single value, returning the result and an issue
    /// description when the value was rewritten or dropped.
    fn transform_value(&mut self, column: &ColumnMeta, value: Value) -> (Value, Option<String>) {
        // Null and undefined inputs pass through unchanged.
        if value.is_null() {
            return (Value::Null, None);
        }

        // Empty string is normalized to null before any family logic.
        if matches!(&value, Value::Text(s) if s.is_empty()) {
            return (Value::Null, Some("empty string normalized to null".into()));
        }

        if column.type_family == TypeFamily::Enum {
            if let Some(labels) = self.enums.get(&column.udt_name) {
                return self.coerce_enum(value, labels);
            }
            // Enum type absent from the catalog: treat as plain text.
            return (self.to_text(value), None);
        }

        match column.type_family {
            TypeFamily::Integer => self.coerce_integer(value),
            TypeFamily::Numeric => self.coerce_float(value),
            TypeFamily::Boolean => self.coerce_boolean(value),
            TypeFamily::Temporal => self.coerce_temporal(value),
            TypeFamily::Json => self.coerce_json(value),
            TypeFamily::Text | TypeFamily::Other => (self.to_text(value), None),
            TypeFamily::Enum => unreachable!("handled above"),
        }
    }

    /// The enum coercion cascade. Short-circuits on the first matching
    /// rule; later rules never override earlier ones.
    fn coerce_enum(&mut self, value: Value, labels: &[String]) -> (Value, Option<String>) {
        if labels.is_empty() {
            self.stats.null_substitutions += 1;
            return (Value::Null, Some("enum catalog entry is empty".into()));
        }

        let raw = value.as_text().unwrap_or_default();

        // 1. Exact match.
        if labels.iter().any(|l| l == &raw) {
            return (Value::Text(raw), None);
        }

        let folded = raw.to_lowercase();

        // 2. Case-insensitive match.
        if let Some(label) = labels.iter().find(|l| l.to_lowercase() == folded) {
            self.stats.enum_transformations += 1;
            return (
                Value::Text(label.clone()),
                Some(format!("'{}' mapped to enum label '{}'", raw, label)),
            );
        }

        // 3. Substring match, catalog order breaking ties.
        if let Some(label) = labels.iter().find(|l| {
            let l_folded = l.to_lowercase();
            l_folded.contains(&folded) || folded.contains(&l_folded)
        }) {
            self.stats.enum_transformations += 1;
            return (
                Value::Text(label.clone()),
                Some(format!("'{}' mapped to enum label '{}'", raw, label)),
            );
        }

        // 4. Common-synonym mapping.
        if let Some((_, target)) = SYNONYMS.iter().find(|(alias, _)| *alias == folded) {
            if let Some(label) = labels.iter().find(|l| l == target) {
                self.stats.enum_transformations += 1;
                return (
                    Value::Text(label.clone()),
                    Some(format!("'{}' mapped to enum label '{}'", raw, label)),
                );
            }
        }

        // 5. Default: the first catalog label.
        self.stats.default_substitutions += 1;
        (
            Value::Text(labels[0].clone()),
            Some(format!(
                "'{}' has no enum match; defaulting to '{}'",
                raw, labels[0]
            )),
        )
    }

    fn coerce_integer(&mut self, value: Value) -> (Value, Option<String>) {
        match value {
            Value::Int(_) => (value, None),
            Value::Float(f) => (Value::Int(f.trunc() as i64), None),
            Value::Text(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return (Value::Int(i), None);
                }
                if let Ok(f) = trimmed.parse::<f64>() {
                    return (Value::Int(f.trunc() as i64), None);
                }
                self.fail(format!("'{}' is not an integer", s))
            }
            other => self.fail(format!("{:?} is not an integer", other)),
        }
    }

    fn coerce_float(&mut self, value: Value) -> (Value, Option<String>) {
        match value {
            Value::Float(_) => (value, None),
            Value::Int(i) => (Value::Float(i as f64), None),
            Value::Text(s) => match s.trim().parse::<f64>() {
                Ok(f) => (Value::Float(f), None),
                Err(_) => self.fail(format!("'{}' is not numeric", s)),
            },
            other => self.fail(format!("{:?} is not numeric", other)),
        }
    }

    fn coerce_boolean(&mut self, value: Value) -> (Value, Option<String>) {
        if let Value::Bool(_) = value {
            return (value, None);
        }

        let folded = value.as_text().unwrap_or_default().to_lowercase();
        if TRUE_FORMS.contains(&folded.as_str()) {
            return (Value::Bool(true), None);
        }
        if FALSE_FORMS.contains(&folded.as_str()) {
            return (Value::Bool(false), None);
        }
        self.fail(format!("'{}' is not a boolean", folded))
    }

    fn coerce_temporal(&mut self, value: Value) -> (Value, Option<String>) {
        match value {
            Value::Timestamp(_) => (value, None),
            Value::Text(ref s) => match parse_temporal(s.trim()) {
                Some(ts) => (Value::Timestamp(ts), None),
                None => self.fail(format!("'{}' is not a recognized timestamp", s)),
            },
            other => self.fail(format!("{:?} is not a timestamp", other)),
        }
    }

    fn coerce_json(&mut self, value: Value) -> (Value, Option<String>) {
        match value {
            Value::Json(_) => (value, None),
            Value::Text(s) => {
                // Pre-formatted JSON arrays and objects pass through
                // untouched.
                if looks_like_json(&s) {
                    return (Value::Json(s), None);
                }
                (Value::Json(serde_json::Value::String(s).to_string()), None)
            }
            Value::Bool(b) => (Value::Json(b.to_string()), None),
            Value::Int(i) => (Value::Json(i.to_string()), None),
            Value::Float(f) => (Value::Json(f.to_string()), None),
            other => {
                let text = other.as_text().unwrap_or_default();
                (Value::Json(serde_json::Value::String(text).to_string()), None)
            }
        }
    }

    fn to_text(&self, value: Value) -> Value {
        match value {
            Value::Text(_) => value,
            other => match other.as_text() {
                Some(s) => Value::Text(s),
                None => Value::Null,
            },
        }
    }

    fn fail(&mut self, message: String) -> (Value, Option<String>) {
        self.stats.coercion_failures += 1;
        (Value::Null, Some(message))
    }
}

/// Whether a string is syntactically a JSON array or object.
fn looks_like_json(s: &str) -> bool {
    let trimmed = s.trim_start();
    if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(s).is_ok()
}

/// Parse an ISO-8601 timestamp, with or without offset, date-only allowed.
fn parse_temporal(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, family: TypeFamily, udt: &str) -> ColumnMeta {
        ColumnMeta {
            name: name.to_string(),
            type_family: family,
            udt_name: udt.to_string(),
            is_nullable: true,
            has_default: false,
        }
    }

    fn catalog(entries: &[(&str, &[&str])]) -> EnumCatalog {
        entries
            .iter()
            .map(|(name, labels)| {
                (
                    name.to_string(),
                    labels.iter().map(|l| l.to_string()).collect(),
                )
            })
            .collect()
    }

    fn row(name: &str, value: Value) -> Row {
        Row::from_pairs(vec![(name.to_string(), value)])
    }

    #[test]
    fn test_enum_exact_match_keeps_value_without_counting() {
        let cols = [column("status", TypeFamily::Enum, "status_enum")];
        let enums = catalog(&[("status_enum", &["ACTIVE", "INACTIVE"])]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("status", Value::Text("ACTIVE".into())));
        assert_eq!(out.get("status"), Some(&Value::Text("ACTIVE".into())));
        assert_eq!(tf.stats().total(), 0);
    }

    #[test]
    fn test_enum_case_insensitive_match() {
        let cols = [column("status", TypeFamily::Enum, "status_enum")];
        let enums = catalog(&[("status_enum", &["ACTIVE", "INACTIVE"])]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("status", Value::Text("active".into())));
        assert_eq!(out.get("status"), Some(&Value::Text("ACTIVE".into())));
        assert_eq!(tf.stats().enum_transformations, 1);
    }

    #[test]
    fn test_enum_substring_match_first_label_wins() {
        let cols = [column("kind", TypeFamily::Enum, "kind_enum")];
        let enums = catalog(&[("kind_enum", &["SUPERACT", "ACTING"])]);
        let mut tf = Transformer::new(&cols, &enums);

        // "act" is a substring of both labels; catalog order decides.
        let out = tf.transform_row(row("kind", Value::Text("act".into())));
        assert_eq!(out.get("kind"), Some(&Value::Text("SUPERACT".into())));
        assert_eq!(tf.stats().enum_transformations, 1);
    }

    #[test]
    fn test_enum_synonym_mapping() {
        let cols = [column("kind", TypeFamily::Enum, "kind_enum")];
        let enums = catalog(&[("kind_enum", &["ORGANIZATION", "INDIVIDUAL"])]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("kind", Value::Text("activity".into())));
        assert_eq!(out.get("kind"), Some(&Value::Text("INDIVIDUAL".into())));
        assert_eq!(tf.stats().enum_transformations, 1);
    }

    #[test]
    fn test_enum_default_substitution() {
        let cols = [column("type", TypeFamily::Enum, "type_enum")];
        let enums = catalog(&[("type_enum", &["USER", "ADMIN"])]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("type", Value::Text("INVALID_TYPE".into())));
        assert_eq!(out.get("type"), Some(&Value::Text("USER".into())));
        assert_eq!(tf.stats().default_substitutions, 1);
    }

    #[test]
    fn test_enum_empty_catalog_entry_yields_null() {
        let cols = [column("type", TypeFamily::Enum, "type_enum")];
        let enums = catalog(&[("type_enum", &[])]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("type", Value::Text("anything".into())));
        assert_eq!(out.get("type"), Some(&Value::Null));
        assert_eq!(tf.stats().null_substitutions, 1);
    }

    #[test]
    fn test_enum_cascade_short_circuits() {
        // "active" matches case-insensitively, so the synonym table (which
        // also knows "active") must never be consulted.
        let cols = [column("status", TypeFamily::Enum, "status_enum")];
        let enums = catalog(&[("status_enum", &["Active", "ACTIVE"])]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("status", Value::Text("active".into())));
        // First catalog label with a case-folded match wins.
        assert_eq!(out.get("status"), Some(&Value::Text("Active".into())));
        assert_eq!(tf.stats().enum_transformations, 1);
        assert_eq!(tf.stats().default_substitutions, 0);
    }

    #[test]
    fn test_enum_without_catalog_entry_is_plain_text() {
        let cols = [column("status", TypeFamily::Enum, "mystery_enum")];
        let enums = catalog(&[]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("status", Value::Text("whatever".into())));
        assert_eq!(out.get("status"), Some(&Value::Text("whatever".into())));
        assert_eq!(tf.stats().total(), 0);
    }

    #[test]
    fn test_null_passes_through() {
        let cols = [column("status", TypeFamily::Enum, "status_enum")];
        let enums = catalog(&[("status_enum", &["A"])]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("status", Value::Null));
        assert_eq!(out.get("status"), Some(&Value::Null));
        assert_eq!(tf.stats().total(), 0);
    }

    #[test]
    fn test_empty_string_becomes_null() {
        let cols = [column("note", TypeFamily::Text, "text")];
        let enums = catalog(&[]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("note", Value::Text(String::new())));
        assert_eq!(out.get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_integer_coercion() {
        let cols = [column("n", TypeFamily::Integer, "int8")];
        let enums = catalog(&[]);
        let mut tf = Transformer::new(&cols, &enums);

        assert_eq!(
            tf.transform_row(row("n", Value::Text("42".into()))).get("n"),
            Some(&Value::Int(42))
        );
        assert_eq!(
            tf.transform_row(row("n", Value::Text("3.7".into()))).get("n"),
            Some(&Value::Int(3))
        );
        assert_eq!(
            tf.transform_row(row("n", Value::Text("abc".into()))).get("n"),
            Some(&Value::Null)
        );
        assert_eq!(tf.stats().coercion_failures, 1);
    }

    #[test]
    fn test_boolean_textual_forms() {
        let cols = [column("flag", TypeFamily::Boolean, "bool")];
        let enums = catalog(&[]);
        let mut tf = Transformer::new(&cols, &enums);

        for form in ["true", "1", "YES", "on", "t", "y"] {
            let out = tf.transform_row(row("flag", Value::Text(form.into())));
            assert_eq!(out.get("flag"), Some(&Value::Bool(true)), "form {}", form);
        }
        for form in ["false", "0", "No", "off", "f", "n"] {
            let out = tf.transform_row(row("flag", Value::Text(form.into())));
            assert_eq!(out.get("flag"), Some(&Value::Bool(false)), "form {}", form);
        }

        let out = tf.transform_row(row("flag", Value::Text("maybe".into())));
        assert_eq!(out.get("flag"), Some(&Value::Null));
        assert_eq!(tf.stats().coercion_failures, 1);
    }

    #[test]
    fn test_temporal_coercion() {
        let cols = [column("at", TypeFamily::Temporal, "timestamptz")];
        let enums = catalog(&[]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("at", Value::Text("2024-03-01T12:30:00Z".into())));
        assert!(matches!(out.get("at"), Some(Value::Timestamp(_))));

        let out = tf.transform_row(row("at", Value::Text("2024-03-01".into())));
        assert!(matches!(out.get("at"), Some(Value::Timestamp(_))));

        let out = tf.transform_row(row("at", Value::Text("not a date".into())));
        assert_eq!(out.get("at"), Some(&Value::Null));
        assert_eq!(tf.stats().coercion_failures, 1);
    }

    #[test]
    fn test_json_passthrough_and_stringify() {
        let cols = [column("payload", TypeFamily::Json, "jsonb")];
        let enums = catalog(&[]);
        let mut tf = Transformer::new(&cols, &enums);

        // JSON-looking strings pass through untouched.
        let out = tf.transform_row(row("payload", Value::Text(r#"{"a":1}"#.into())));
        assert_eq!(out.get("payload"), Some(&Value::Json(r#"{"a":1}"#.into())));

        // Plain strings are stringified to a JSON string literal.
        let out = tf.transform_row(row("payload", Value::Text("plain".into())));
        assert_eq!(out.get("payload"), Some(&Value::Json(r#""plain""#.into())));

        // Nested structures already arrive serialized from the extractor.
        let out = tf.transform_row(row("payload", Value::Json("[1,2]".into())));
        assert_eq!(out.get("payload"), Some(&Value::Json("[1,2]".into())));
    }

    #[test]
    fn test_unknown_column_left_untouched() {
        let cols = [column("known", TypeFamily::Text, "text")];
        let enums = catalog(&[]);
        let mut tf = Transformer::new(&cols, &enums);

        let out = tf.transform_row(row("ghost", Value::Int(9)));
        assert_eq!(out.get("ghost"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_validate_row_reports_without_mutating() {
        let cols = [column("status", TypeFamily::Enum, "status_enum")];
        let enums = catalog(&[("status_enum", &["ACTIVE", "INACTIVE"])]);
        let mut tf = Transformer::new(&cols, &enums);

        let input = row("status", Value::Text("active".into()));
        let issues = tf.validate_row(&input);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].column, "status");
        // The row itself is untouched.
        assert_eq!(input.get("status"), Some(&Value::Text("active".into())));
    }

    #[test]
    fn test_parse_temporal_formats() {
        assert!(parse_temporal("2024-01-02T03:04:05Z").is_some());
        assert!(parse_temporal("2024-01-02T03:04:05.123").is_some());
        assert!(parse_temporal("2024-01-02 03:04:05").is_some());
        assert!(parse_temporal("2024-01-02").is_some());
        assert!(parse_temporal("02/01/2024").is_none());
    }
}
