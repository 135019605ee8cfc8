use crate::domain::context::RequestContext;
use crate::domain::document::Document;
use crate::domain::error::RwError;
use crate::storage::DocumentStore;
use crate::transport::http::types::{
    AppState, MessageResponse, RouteTable, DOCUMENT_HASH_HEADER, PREVIOUS_DOCUMENT_HASH_HEADER,
    REQUEST_ID_HEADER, TIMESTAMP_METADATA,
};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::collections::HashMap;

pub const NOT_FOUND_MESSAGE: &str = "No document found.";

/// The caller's `X-Request-Id`, or a fresh `tid_` identifier.
pub fn transaction_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("tid_{}", uuid::Uuid::new_v4().simple()))
}

pub async fn read_handler<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(route): Extension<RouteTable>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let txid = transaction_id(&headers);
    let Some(key) = route.key(&params) else {
        return missing_key(&route);
    };
    let ctx = RequestContext::new(txid.clone()).with_timeout(state.timeout);

    match state.service.read(&ctx, &route.table, key).await {
        Ok(doc) => {
            tracing::info!(table = %route.table, key = %key, transaction_id = %txid, "document found, responding");
            let mut response_headers = HeaderMap::new();
            response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            insert_header(&mut response_headers, REQUEST_ID_HEADER, &txid);
            insert_header(&mut response_headers, DOCUMENT_HASH_HEADER, &doc.hash);
            for (name, value) in &doc.metadata {
                insert_header(&mut response_headers, name, value);
            }
            (StatusCode::OK, response_headers, doc.body).into_response()
        }
        Err(e) => error_response(e, &txid),
    }
}

/// Query string values, overridden by path parameters of the same name.
pub fn request_params(
    path: HashMap<String, String>,
    query: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut params = query;
    params.extend(path);
    params
}

pub async fn write_handler<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(route): Extension<RouteTable>,
    Path(path): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = request_params(path, query);
    let txid = transaction_id(&headers);
    let Some(key) = route.key(&params) else {
        return missing_key(&route);
    };
    // The deadline starts once the body has been received.
    let ctx = RequestContext::new(txid.clone()).with_timeout(state.timeout);

    let mut doc = Document::new(body.to_vec());
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            doc.set_metadata(name.as_str(), value);
        }
    }
    doc.set_metadata(REQUEST_ID_HEADER, txid.as_str());
    doc.set_metadata(
        TIMESTAMP_METADATA,
        chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string(),
    );
    let previous_hash = headers
        .get(PREVIOUS_DOCUMENT_HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state
        .service
        .write(&ctx, &route.table, key, doc, &params, previous_hash)
        .await
    {
        Ok(outcome) => {
            let status = if outcome.created {
                tracing::info!(table = %route.table, key = %key, transaction_id = %txid, "document has been created");
                StatusCode::CREATED
            } else {
                tracing::info!(table = %route.table, key = %key, transaction_id = %txid, "document has been updated");
                StatusCode::OK
            };
            let mut response_headers = HeaderMap::new();
            insert_header(&mut response_headers, REQUEST_ID_HEADER, &txid);
            insert_header(&mut response_headers, DOCUMENT_HASH_HEADER, &outcome.hash);
            (status, response_headers).into_response()
        }
        Err(e) => error_response(e, &txid),
    }
}

fn error_response(e: RwError, txid: &str) -> Response {
    let status = match &e {
        RwError::NotFound { .. } => {
            return (
                StatusCode::NOT_FOUND,
                Json(MessageResponse::new(NOT_FOUND_MESSAGE)),
            )
                .into_response()
        }
        RwError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::debug!(transaction_id = %txid, status = %status, error = %e, "request failed");
    (status, Json(MessageResponse::new(e.to_string()))).into_response()
}

fn missing_key(route: &RouteTable) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(MessageResponse::new(format!(
            "missing path parameter '{}'",
            route.key_param
        ))),
    )
        .into_response()
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::try_from(name),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = %name, "skipping header that cannot be sent over HTTP"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_is_taken_from_request() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("tid_abc"));
        assert_eq!(transaction_id(&headers), "tid_abc");
    }

    #[test]
    fn path_parameters_win_over_query() {
        let path = HashMap::from([("uuid".to_string(), "from-path".to_string())]);
        let query = HashMap::from([
            ("uuid".to_string(), "from-query".to_string()),
            ("source".to_string(), "cms".to_string()),
        ]);

        let params = request_params(path, query);

        assert_eq!(params["uuid"], "from-path");
        assert_eq!(params["source"], "cms");
    }

    #[test]
    fn transaction_id_is_generated_when_absent() {
        let txid = transaction_id(&HeaderMap::new());
        assert!(txid.starts_with("tid_"));
        assert_eq!(txid.len(), "tid_".len() + 32);
    }
}
