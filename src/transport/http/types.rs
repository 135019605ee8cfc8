use crate::app::RwService;
use crate::domain::mapping::{Expression, TableMapping};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

pub const DOCUMENT_HASH_HEADER: &str = "document-hash";
pub const PREVIOUS_DOCUMENT_HASH_HEADER: &str = "previous-document-hash";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TIMESTAMP_METADATA: &str = "_timestamp";

pub struct AppState<S> {
    pub service: Arc<RwService<S>>,
    /// Deadline given to every read and write.
    pub timeout: Duration,
    pub system_code: String,
    pub app_name: String,
    pub description: String,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            timeout: self.timeout,
            system_code: self.system_code.clone(),
            app_name: self.app_name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Per-route data: the table a configured path reads and writes.
#[derive(Debug, Clone)]
pub struct RouteTable {
    pub table: String,
    /// Path parameter holding the document key.
    pub key_param: String,
}

impl RouteTable {
    /// The key is the `id` path parameter when the path has one, otherwise the
    /// parameter bound to the primary-key column.
    pub fn for_path(path: &str, mapping: &TableMapping) -> Self {
        let params: Vec<&str> = path
            .split('/')
            .filter_map(|segment| segment.strip_prefix(':'))
            .collect();
        let pk_param = mapping
            .columns()
            .iter()
            .find(|(column, _)| column == mapping.primary_key())
            .and_then(|(_, expr)| match expr {
                Expression::Param(name) => Some(name.as_str()),
                _ => None,
            });

        let key_param = if params.contains(&"id") {
            "id"
        } else {
            pk_param
                .filter(|p| params.contains(p))
                .unwrap_or(mapping.primary_key())
        };
        Self {
            table: mapping.name().to_string(),
            key_param: key_param.to_string(),
        }
    }

    pub fn key<'p>(&self, params: &'p HashMap<String, String>) -> Option<&'p str> {
        params
            .get(&self.key_param)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub id: String,
    pub name: String,
    pub ok: bool,
    pub severity: u8,
    pub business_impact: String,
    pub technical_summary: String,
    pub check_output: String,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub schema_version: u8,
    pub system_code: String,
    pub name: String,
    pub description: String,
    pub ok: bool,
    pub checks: Vec<HealthCheckResult>,
}
