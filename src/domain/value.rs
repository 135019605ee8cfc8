use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A scalar bound into, or read out of, a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

/// Column name -> value, ordered by column name so generated statements are stable.
pub type ColumnValues = BTreeMap<String, ColumnValue>;

impl ColumnValue {
    /// Converts a JSONPath result. Objects and arrays are kept as compact JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => ColumnValue::Null,
            JsonValue::Bool(b) => ColumnValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => ColumnValue::Integer(i),
                None => n
                    .as_f64()
                    .map(ColumnValue::Float)
                    .unwrap_or_else(|| ColumnValue::Text(n.to_string())),
            },
            JsonValue::String(s) => ColumnValue::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => ColumnValue::Text(value.to_string()),
        }
    }

    /// Raw body bytes: text when valid UTF-8, bytes otherwise.
    pub fn from_body(body: &[u8]) -> Self {
        match std::str::from_utf8(body) {
            Ok(s) => ColumnValue::Text(s.to_string()),
            Err(_) => ColumnValue::Bytes(body.to_vec()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Textual form used for headers and merged body properties. `None` for SQL NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            ColumnValue::Null => None,
            ColumnValue::Text(s) => Some(s.clone()),
            ColumnValue::Integer(i) => Some(i.to_string()),
            ColumnValue::Float(f) => Some(f.to_string()),
            ColumnValue::Bool(b) => Some(b.to_string()),
            ColumnValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            ColumnValue::Null => None,
            ColumnValue::Bytes(b) => Some(b),
            ColumnValue::Text(s) => Some(s.into_bytes()),
            other => other.to_text().map(String::into_bytes),
        }
    }
}
