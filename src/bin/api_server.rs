// src/bin/api_server.rs

use anyhow::Context;
use generic_rw_postgres::app::migrations;
use generic_rw_postgres::infra::config::{redact_url, APP_DESCRIPTION};
use generic_rw_postgres::infra::logging::init_tracing;
use generic_rw_postgres::transport;
use generic_rw_postgres::{PgStore, RwConfig, RwService, SchemaMigrator, Settings};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load();
    init_tracing(&settings.log_level);
    tracing::info!(system_code = %settings.app_system_code, "[Startup] {} is starting", settings.app_system_code);

    let rw_config = RwConfig::from_file(&settings.rw_config)
        .context("unable to read r/w configuration")?;
    let registry = rw_config.registry().context("invalid r/w configuration")?;

    tracing::info!(database = %redact_url(&settings.database_url), "connecting to database");
    let store = match PgStore::connect(
        &settings.database_url,
        settings.db_max_connections,
        settings.pool_acquire_timeout(),
    )
    .await
    {
        Ok(store) => store,
        Err(e) => {
            // Keep serving health endpoints; the pool retries on every request.
            tracing::error!(error = %e, "unable to connect to database");
            PgStore::connect_lazy(
                &settings.database_url,
                settings.db_max_connections,
                settings.pool_acquire_timeout(),
            )
            .context("invalid database connection URL")?
        }
    };

    let migrator = SchemaMigrator::new(migrations::registered()?)
        .with_lock_wait(settings.db_lock_wait);
    let service = RwService::start(
        store,
        registry,
        &migrator,
        settings.db_perform_schema_migrations,
    )
    .await
    .with_conflict_severity(settings.conflict_log_level);

    let state = transport::http::AppState {
        service: Arc::new(service),
        timeout: settings.app_timeout,
        system_code: settings.app_system_code.clone(),
        app_name: settings.app_name.clone(),
        description: APP_DESCRIPTION.to_string(),
    };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);
    let app = transport::http::create_router(state, &rw_config)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()))
        .layer(cors);

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("unable to bind {}", addr))?;
    tracing::info!(addr = %addr, app_name = %settings.app_name, "API server listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
