//! Column value extraction: evaluates a table mapping against one document.

use crate::domain::context::RequestContext;
use crate::domain::document::Document;
use crate::domain::error::{RwError, RwResult};
use crate::domain::mapping::{Expression, TableMapping, HASH_COLUMN};
use crate::domain::value::{ColumnValue, ColumnValues};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Produces the column -> value map to bind for a write of `doc` under `key`.
///
/// The body is parsed as JSON at most once, and only when a JSONPath column
/// exists. A JSONPath that matches nothing is logged and its column left out;
/// a body that is not JSON at all fails the whole extraction.
pub fn extract_column_values(
    mapping: &TableMapping,
    key: &str,
    doc: &Document,
    params: &HashMap<String, String>,
    ctx: &RequestContext,
) -> RwResult<ColumnValues> {
    let mut values = ColumnValues::new();
    let mut parsed: Option<JsonValue> = None;

    for (column, expr) in mapping.columns() {
        let value = match expr {
            Expression::Literal(v) => ColumnValue::Text(v.clone()),
            Expression::Param(name) => match params.get(name) {
                Some(v) => ColumnValue::Text(v.clone()),
                None => {
                    tracing::debug!(table = mapping.name(), column = %column, param = %name, "request parameter is absent");
                    ColumnValue::Null
                }
            },
            Expression::Metadata(name) => match doc.metadata.get(name) {
                Some(v) => ColumnValue::Text(v.clone()),
                None => {
                    tracing::debug!(table = mapping.name(), column = %column, metadata = %name, "document metadata is absent");
                    ColumnValue::Null
                }
            },
            Expression::WholeBody => ColumnValue::from_body(&doc.body),
            Expression::JsonPath(path) => {
                if parsed.is_none() {
                    let json = serde_json::from_slice::<JsonValue>(&doc.body).map_err(|e| {
                        tracing::error!(
                            table = mapping.name(),
                            key = %key,
                            transaction_id = %ctx.transaction_id,
                            error = %e,
                            "unable to parse document as JSON"
                        );
                        RwError::InvalidDocument {
                            table: mapping.name().to_string(),
                            key: key.to_string(),
                            reason: format!("body is not valid JSON: {}", e),
                        }
                    })?;
                    parsed = Some(json);
                }
                match parsed.as_ref().and_then(|json| path.lookup(json)) {
                    Some(found) => ColumnValue::from_json(found),
                    None => {
                        tracing::warn!(
                            table = mapping.name(),
                            key = %key,
                            transaction_id = %ctx.transaction_id,
                            column = %column,
                            expr = %path,
                            "unable to extract JSONPath value from document"
                        );
                        continue;
                    }
                }
            }
        };
        values.insert(column.clone(), value);
    }

    values.insert(
        mapping.primary_key().to_string(),
        ColumnValue::Text(key.to_string()),
    );
    values.insert(HASH_COLUMN.to_string(), ColumnValue::Text(doc.hash.clone()));

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hashing::hash_document;

    fn mapping() -> TableMapping {
        TableMapping::builder("t", "id")
            .column("id", ":id")
            .column("body", "$")
            .column("ts", "@.timestamp")
            .column("kind", "annotation")
            .column("title", "$.post.title")
            .column("tag", "$.post.tags[0]")
            .build()
            .unwrap()
    }

    fn doc(body: &str) -> Document {
        let mut doc = Document::with_hash(body, hash_document(body.as_bytes()));
        doc.set_metadata("timestamp", "2024-01-01T00:00:00.000Z");
        doc
    }

    fn params() -> HashMap<String, String> {
        HashMap::from([("id".to_string(), "k1".to_string())])
    }

    #[test]
    fn evaluates_every_expression_kind() {
        let d = doc(r#"{"post":{"title":"hi","tags":["a"]}}"#);
        let values =
            extract_column_values(&mapping(), "k1", &d, &params(), &RequestContext::default())
                .unwrap();

        assert_eq!(values["id"], ColumnValue::Text("k1".into()));
        assert_eq!(values["body"], ColumnValue::Text(String::from_utf8(d.body.clone()).unwrap()));
        assert_eq!(values["ts"], ColumnValue::Text("2024-01-01T00:00:00.000Z".into()));
        assert_eq!(values["kind"], ColumnValue::Text("annotation".into()));
        assert_eq!(values["title"], ColumnValue::Text("hi".into()));
        assert_eq!(values["tag"], ColumnValue::Text("a".into()));
        assert_eq!(values[HASH_COLUMN], ColumnValue::Text(d.hash.clone()));
    }

    #[test]
    fn jsonpath_miss_omits_the_column() {
        let d = doc(r#"{"post":{}}"#);
        let values =
            extract_column_values(&mapping(), "k1", &d, &params(), &RequestContext::default())
                .unwrap();
        assert!(!values.contains_key("title"));
        assert!(!values.contains_key("tag"));
        assert!(values.contains_key("body"));
    }

    #[test]
    fn non_json_body_fails_when_jsonpaths_exist() {
        let d = doc("not json");
        let err =
            extract_column_values(&mapping(), "k1", &d, &params(), &RequestContext::default())
                .unwrap_err();
        assert!(matches!(err, RwError::InvalidDocument { .. }));
    }

    #[test]
    fn non_json_body_is_fine_without_jsonpaths() {
        let plain = TableMapping::builder("t", "id")
            .column("id", ":id")
            .column("body", "$")
            .build()
            .unwrap();
        let values =
            extract_column_values(&plain, "k1", &doc("plain text"), &params(), &RequestContext::default())
                .unwrap();
        assert_eq!(values["body"], ColumnValue::Text("plain text".into()));
    }

    #[test]
    fn key_overrides_mapped_primary_key_and_missing_params_are_null() {
        let values = extract_column_values(
            &mapping(),
            "k2",
            &doc(r#"{"post":{}}"#),
            &HashMap::new(),
            &RequestContext::default(),
        )
        .unwrap();
        assert_eq!(values["id"], ColumnValue::Text("k2".into()));

        let no_ts = Document::with_hash("{}", "h");
        let values =
            extract_column_values(&mapping(), "k2", &no_ts, &params(), &RequestContext::default())
                .unwrap();
        assert_eq!(values["ts"], ColumnValue::Null);
    }
}
