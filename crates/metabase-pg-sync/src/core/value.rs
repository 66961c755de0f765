//! In-flight row values for database-agnostic data transfer.
//!
//! Rows arrive from the upstream API as JSON and leave through the target
//! driver as bound statement parameters. `Value` is the tagged union in
//! between; the Transformer is the only component that constructs variants
//! the upstream decoder does not produce.

use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

/// A single column value in flight between extract and load.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit floating point.
    Float(f64),

    /// Text data.
    Text(String),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Pre-serialized JSON text (array or object).
    Json(String),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual rendering used by enum matching and text-column coercion.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::Json(s) => Some(s.clone()),
        }
    }

    /// Decode a JSON value from an upstream dataset page.
    ///
    /// Nested arrays and objects are serialized to their canonical JSON text
    /// so the Loader can hand them to a json-family column as a string.
    pub fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            nested => Value::Json(nested.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

/// An in-flight row: an ordered sequence of (column name, value).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a row by zipping column names with values.
    #[must_use]
    pub fn from_pairs(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    /// Append a column to the row.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    /// Look up a column by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterate the (name, value) entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    /// Mutable iteration over the (name, value) entries.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (String, Value)> {
        self.entries.iter_mut()
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A batch of rows plus the union of column names present in any row.
///
/// Column names keep first-seen order so statement construction is
/// deterministic for a given page.
#[derive(Debug, Default)]
pub struct Batch {
    /// Rows in this batch.
    pub rows: Vec<Row>,

    /// Union of column names across all rows, first-seen order.
    pub columns: Vec<String>,
}

impl Batch {
    /// Build a batch from rows, computing the column union.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for (name, _) in row.iter() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.clone());
                }
            }
        }
        Self { rows, columns }
    }

    /// Number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        // `Type` values are runtime constants, so dispatch is by equality
        // rather than match patterns.
        match self {
            Value::Null => Ok(IsNull::Yes),

            Value::Bool(b) => {
                if *ty == Type::BOOL {
                    b.to_sql(ty, out)
                } else if is_text_type(ty) {
                    b.to_string().to_sql(&Type::TEXT, out)
                } else {
                    Err(mismatch("bool", ty))
                }
            }

            Value::Int(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    i.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    encode_numeric(out, Decimal::from(*i))
                } else if is_text_type(ty) {
                    i.to_string().to_sql(&Type::TEXT, out)
                } else {
                    Err(mismatch("integer", ty))
                }
            }

            Value::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    f.to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    let d = Decimal::from_f64_retain(*f)
                        .ok_or_else(|| mismatch("non-finite float", ty))?;
                    encode_numeric(out, d)
                } else if is_text_type(ty) {
                    f.to_string().to_sql(&Type::TEXT, out)
                } else {
                    Err(mismatch("float", ty))
                }
            }

            Value::Text(s) => {
                if *ty == Type::UUID {
                    Uuid::parse_str(s.trim())?.to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    encode_numeric(out, Decimal::from_str(s.trim())?)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    encode_json(out, ty, s)
                } else {
                    s.to_sql(&Type::TEXT, out)
                }
            }

            Value::Timestamp(ts) => {
                if *ty == Type::TIMESTAMPTZ {
                    DateTime::<Utc>::from_naive_utc_and_offset(*ts, Utc).to_sql(ty, out)
                } else if *ty == Type::DATE {
                    ts.date().to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP {
                    ts.to_sql(ty, out)
                } else if is_text_type(ty) {
                    ts.format("%Y-%m-%dT%H:%M:%S%.f")
                        .to_string()
                        .to_sql(&Type::TEXT, out)
                } else {
                    Err(mismatch("timestamp", ty))
                }
            }

            Value::Json(s) => {
                if *ty == Type::JSON || *ty == Type::JSONB {
                    encode_json(out, ty, s)
                } else {
                    s.to_sql(&Type::TEXT, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Mismatches are reported per-value from to_sql so the Loader's
        // row-level fallback can isolate them.
        true
    }

    to_sql_checked!();
}

fn mismatch(have: &str, ty: &Type) -> Box<dyn std::error::Error + Sync + Send> {
    format!("cannot bind {} value to column of type {}", have, ty).into()
}

fn is_text_type(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR
}

/// Write a JSON payload in the wire format the column family expects.
///
/// jsonb carries a one-byte version header before the UTF-8 text; json is
/// the bare text.
fn encode_json(
    out: &mut BytesMut,
    ty: &Type,
    payload: &str,
) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
    if *ty == Type::JSONB {
        out.put_u8(1);
    }
    out.put_slice(payload.as_bytes());
    Ok(IsNull::No)
}

/// Encode a decimal into PostgreSQL binary NUMERIC format.
///
/// Layout: ndigits (i16), weight (i16), sign (i16), dscale (i16), then the
/// base-10000 digit array.
fn encode_numeric(
    out: &mut BytesMut,
    d: Decimal,
) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
    const NUMERIC_POS: i16 = 0x0000;
    const NUMERIC_NEG: i16 = 0x4000;

    if d.is_zero() {
        out.put_i16(0); // ndigits
        out.put_i16(0); // weight
        out.put_i16(NUMERIC_POS);
        out.put_i16(d.scale() as i16);
        return Ok(IsNull::No);
    }

    let sign = if d.is_sign_negative() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };
    let dscale = d.scale() as i16;

    // Work from the string rendering so decimal positioning survives cases
    // like 0.01 where the mantissa alone loses leading zeros.
    let abs_str = d.abs().to_string();
    let (int_part, frac_part) = match abs_str.find('.') {
        Some(dot) => (&abs_str[..dot], &abs_str[dot + 1..]),
        None => (abs_str.as_str(), ""),
    };

    // Integer digits group right-to-left from the decimal point; pad on the
    // left to a multiple of 4.
    let mut digits: Vec<i16> = Vec::new();
    let int_trimmed = int_part.trim_start_matches('0');
    if !int_trimmed.is_empty() {
        let padded = format!("{:0>width$}", int_trimmed, width = int_trimmed.len().div_ceil(4) * 4);
        for chunk in padded.as_bytes().chunks(4) {
            digits.push(std::str::from_utf8(chunk)?.parse::<i16>()?);
        }
    }
    let int_groups = digits.len() as i16;

    // Fractional digits group left-to-right; pad on the right.
    if !frac_part.is_empty() {
        let mut padded = frac_part.to_string();
        while padded.len() % 4 != 0 {
            padded.push('0');
        }
        for chunk in padded.as_bytes().chunks(4) {
            digits.push(std::str::from_utf8(chunk)?.parse::<i16>()?);
        }
    }

    let weight = if int_groups > 0 {
        int_groups - 1
    } else {
        let leading_zero_groups = digits.iter().take_while(|&&g| g == 0).count() as i16;
        -(leading_zero_groups + 1)
    };

    while digits.len() > 1 && *digits.last().unwrap() == 0 {
        digits.pop();
    }
    while digits.len() > 1 && digits[0] == 0 {
        digits.remove(0);
    }

    out.put_i16(digits.len() as i16);
    out.put_i16(weight);
    out.put_i16(sign);
    out.put_i16(dscale);
    for digit in digits {
        out.put_i16(digit);
    }
    Ok(IsNull::No)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Value::from_json(serde_json::json!(null)), Value::Null);
        assert_eq!(Value::from_json(serde_json::json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(serde_json::json!(42)), Value::Int(42));
        assert_eq!(Value::from_json(serde_json::json!(1.5)), Value::Float(1.5));
        assert_eq!(
            Value::from_json(serde_json::json!("abc")),
            Value::Text("abc".to_string())
        );
    }

    #[test]
    fn test_from_json_nested_serializes() {
        let v = Value::from_json(serde_json::json!({"a": [1, 2]}));
        assert_eq!(v, Value::Json(r#"{"a":[1,2]}"#.to_string()));
    }

    #[test]
    fn test_batch_column_union_keeps_first_seen_order() {
        let batch = Batch::new(vec![
            Row::from_pairs(vec![("id".into(), Value::Int(1)), ("name".into(), Value::Text("a".into()))]),
            Row::from_pairs(vec![("id".into(), Value::Int(2)), ("extra".into(), Value::Null)]),
        ]);
        assert_eq!(batch.columns, vec!["id", "name", "extra"]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_row_get() {
        let row = Row::from_pairs(vec![("id".into(), Value::Int(7))]);
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("missing"), None);
    }

    fn numeric_parts(buf: &[u8]) -> (i16, i16, i16, i16, Vec<i16>) {
        use bytes::Buf;
        let mut cursor = std::io::Cursor::new(buf);
        let ndigits = cursor.get_i16();
        let weight = cursor.get_i16();
        let sign = cursor.get_i16();
        let dscale = cursor.get_i16();
        let mut digits = Vec::new();
        for _ in 0..ndigits {
            digits.push(cursor.get_i16());
        }
        (ndigits, weight, sign, dscale, digits)
    }

    #[test]
    fn test_encode_numeric_integer() {
        let mut buf = BytesMut::new();
        encode_numeric(&mut buf, Decimal::from_str("12345").unwrap()).unwrap();
        let (ndigits, weight, sign, dscale, digits) = numeric_parts(&buf);
        assert_eq!(ndigits, 2);
        assert_eq!(weight, 1);
        assert_eq!(sign, 0x0000);
        assert_eq!(dscale, 0);
        assert_eq!(digits, vec![1, 2345]);
    }

    #[test]
    fn test_encode_numeric_fraction() {
        let mut buf = BytesMut::new();
        encode_numeric(&mut buf, Decimal::from_str("-123.45").unwrap()).unwrap();
        let (ndigits, weight, sign, dscale, digits) = numeric_parts(&buf);
        assert_eq!(ndigits, 2);
        assert_eq!(weight, 0);
        assert_eq!(sign, 0x4000);
        assert_eq!(dscale, 2);
        assert_eq!(digits, vec![123, 4500]);
    }

    #[test]
    fn test_encode_numeric_small_fraction() {
        let mut buf = BytesMut::new();
        encode_numeric(&mut buf, Decimal::from_str("0.01").unwrap()).unwrap();
        let (ndigits, weight, _sign, dscale, digits) = numeric_parts(&buf);
        assert_eq!(ndigits, 1);
        assert_eq!(weight, -1);
        assert_eq!(dscale, 2);
        assert_eq!(digits, vec![100]);
    }

    #[test]
    fn test_encode_numeric_zero() {
        let mut buf = BytesMut::new();
        encode_numeric(&mut buf, Decimal::ZERO).unwrap();
        let (ndigits, weight, sign, _dscale, digits) = numeric_parts(&buf);
        assert_eq!(ndigits, 0);
        assert_eq!(weight, 0);
        assert_eq!(sign, 0x0000);
        assert!(digits.is_empty());
    }
}
