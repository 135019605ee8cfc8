use crate::app::rw_service::SCHEMA_MISMATCH;
use crate::storage::DocumentStore;
use crate::transport::http::types::{AppState, HealthCheckResult, HealthResponse, MessageResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[utoipa::path(
    get,
    path = "/__health",
    responses(
        (status = 200, description = "Database connectivity and schema checks", body = HealthResponse)
    )
)]
pub async fn healthcheck_handler<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
) -> impl IntoResponse {
    let (ping_ok, ping_output) = match state.service.ping().await {
        Ok(msg) => (true, msg),
        Err(e) => (false, e.to_string()),
    };
    let (schema_ok, schema_output) = match state.service.schema_check() {
        Ok(msg) => (true, msg),
        Err(e) => (false, format!("{}: {}", SCHEMA_MISMATCH, e)),
    };

    let checks = vec![
        HealthCheckResult {
            id: "check-db-connection".to_string(),
            name: "Check database connection".to_string(),
            ok: ping_ok,
            severity: 1,
            business_impact: "Documents cannot be read or written.".to_string(),
            technical_summary: "Application is not connected to the database.".to_string(),
            check_output: ping_output,
        },
        HealthCheckResult {
            id: "check-db-schema".to_string(),
            name: "Check database schema version".to_string(),
            ok: schema_ok,
            severity: 1,
            business_impact: "Documents may not be read or written correctly.".to_string(),
            technical_summary:
                "The database schema is not the version expected by the application.".to_string(),
            check_output: schema_output,
        },
    ];

    Json(HealthResponse {
        schema_version: 1,
        system_code: state.system_code.clone(),
        name: state.app_name.clone(),
        description: state.description.clone(),
        ok: checks.iter().all(|c| c.ok),
        checks,
    })
}

#[utoipa::path(
    get,
    path = "/__gtg",
    responses(
        (status = 200, description = "Connected to the database with a matching schema", body = MessageResponse),
        (status = 503, description = "Not connected or schema not ready", body = MessageResponse)
    )
)]
pub async fn gtg_handler<S: DocumentStore + 'static>(
    State(state): State<AppState<S>>,
) -> impl IntoResponse {
    if let Err(e) = state.service.ping().await {
        tracing::info!(error = %e, "not connected to database");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(MessageResponse::new("Not connected to database")),
        );
    }
    if !state.service.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(MessageResponse::new(SCHEMA_MISMATCH)),
        );
    }
    (StatusCode::OK, Json(MessageResponse::new("OK")))
}
