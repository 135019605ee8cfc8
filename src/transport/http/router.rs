use crate::infra::rw_config::RwConfig;
use crate::storage::DocumentStore;
use crate::transport::http::handlers::{documents, health};
use crate::transport::http::types::{
    AppState, HealthCheckResult, HealthResponse, MessageResponse, RouteTable,
};
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(health::healthcheck_handler, health::gtg_handler),
    components(schemas(HealthResponse, HealthCheckResult, MessageResponse))
)]
pub struct ApiDoc;

/// Admin endpoints plus a `GET`/`PUT` pair for every configured path.
/// Paths whose table has no registered mapping are skipped.
pub fn create_router<S: DocumentStore + 'static>(state: AppState<S>, config: &RwConfig) -> Router {
    let mut router = Router::new()
        .route("/__health", get(health::healthcheck_handler::<S>))
        .route("/__gtg", get(health::gtg_handler::<S>));

    for (path, table) in config.routes() {
        let Some(mapping) = state.service.registry().get(table) else {
            tracing::warn!(path = %path, table = %table, "no mapping for path, endpoint not added");
            continue;
        };
        let route = RouteTable::for_path(path, &mapping);
        tracing::info!(path = %path, table = %table, key_param = %route.key_param, "added r/w endpoint");
        router = router.route(
            path,
            get(documents::read_handler::<S>)
                .put(documents::write_handler::<S>)
                .layer(Extension(route)),
        );
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
