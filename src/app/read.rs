//! Read projection: turns one stored row back into a document.

use crate::domain::context::RequestContext;
use crate::domain::document::Document;
use crate::domain::error::{RwError, RwResult};
use crate::domain::mapping::{TableMapping, HASH_COLUMN};
use crate::domain::value::ColumnValues;
use crate::storage::{DocumentStore, FetchColumn};
use serde_json::{Map, Value as JsonValue};

/// Loads the document stored under `key`.
///
/// Fails with [`RwError::Configuration`] before touching the store when the mapping
/// has no whole-body column. An absent row is [`RwError::NotFound`].
pub async fn read_document<S: DocumentStore>(
    store: &S,
    mapping: &TableMapping,
    key: &str,
    ctx: &RequestContext,
) -> RwResult<Document> {
    let Some(body_column) = mapping.body_column() else {
        tracing::error!(
            table = mapping.name(),
            key = %key,
            transaction_id = %ctx.transaction_id,
            "document column is not configured"
        );
        return Err(RwError::Configuration {
            table: mapping.name().to_string(),
        });
    };

    let columns = fetch_columns(mapping, body_column);
    let row = store
        .fetch(mapping, key, &columns)
        .await
        .map_err(|e| {
            tracing::error!(
                table = mapping.name(),
                key = %key,
                transaction_id = %ctx.transaction_id,
                error = %e,
                "unable to read document from database"
            );
            RwError::Database {
                table: mapping.name().to_string(),
                key: key.to_string(),
                transaction_id: ctx.transaction_id.clone(),
                source: Box::new(e),
            }
        })?;

    let Some(mut row) = row else {
        tracing::info!(
            table = mapping.name(),
            key = %key,
            transaction_id = %ctx.transaction_id,
            "document not found"
        );
        return Err(RwError::NotFound {
            table: mapping.name().to_string(),
            key: key.to_string(),
        });
    };

    let hash = row
        .get(HASH_COLUMN)
        .and_then(|v| v.to_text())
        .unwrap_or_default();
    let mut body = row
        .get(body_column)
        .cloned()
        .and_then(|v| v.into_bytes())
        .unwrap_or_default();

    if !mapping.body_merge().is_empty() {
        body = merge_into_body(mapping, key, ctx, body, &row)?;
    }

    let mut doc = Document::with_hash(body, hash);
    for (column, header) in mapping.header_rules() {
        if let Some(value) = row.remove(column).and_then(|v| v.to_text()) {
            doc.set_metadata(header.clone(), value);
        }
    }
    Ok(doc)
}

/// Body column as stored, then the hash and every augmentation column as text, each once.
fn fetch_columns<'m>(mapping: &'m TableMapping, body_column: &'m str) -> Vec<FetchColumn<'m>> {
    let mut columns = vec![FetchColumn {
        name: body_column,
        as_text: false,
    }];
    let extras = std::iter::once(HASH_COLUMN)
        .chain(mapping.body_merge().iter().map(|(c, _)| c.as_str()))
        .chain(mapping.header_rules().iter().map(|(c, _)| c.as_str()));
    for name in extras {
        if !columns.iter().any(|c| c.name == name) {
            columns.push(FetchColumn {
                name,
                as_text: true,
            });
        }
    }
    columns
}

fn merge_into_body(
    mapping: &TableMapping,
    key: &str,
    ctx: &RequestContext,
    body: Vec<u8>,
    row: &ColumnValues,
) -> RwResult<Vec<u8>> {
    let invalid = |reason: String| {
        tracing::error!(
            table = mapping.name(),
            key = %key,
            transaction_id = %ctx.transaction_id,
            reason = %reason,
            "unable to merge columns into document body"
        );
        RwError::InvalidDocument {
            table: mapping.name().to_string(),
            key: key.to_string(),
            reason,
        }
    };

    let mut object: Map<String, JsonValue> = serde_json::from_slice(&body)
        .map_err(|e| invalid(format!("body is not a JSON object: {}", e)))?;
    for (column, property) in mapping.body_merge() {
        if let Some(value) = row.get(column).and_then(|v| v.to_text()) {
            object.insert(property.clone(), JsonValue::String(value));
        }
    }
    serde_json::to_vec(&object).map_err(|e| invalid(e.to_string()))
}
