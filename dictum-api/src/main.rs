//! DICTUM API Server Entry Point
//!
//! Bootstraps configuration, loads the entity dictionary, and starts the
//! Axum HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use dictum_api::telemetry::{init_tracing, TelemetryConfig};
use dictum_api::{
    create_api_router, load_dictionary, ApiConfig, ApiError, ApiResult, AppState, AuthConfig,
    DbConfig, Dictionary, ImportConfig, PgConnectionFactory,
};
use dictum_core::EntityRegistry;
use dictum_storage::{DirectoryFileStorage, InMemoryAppKeyStore};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::from_env())?;

    let api_config = ApiConfig::from_env();
    let auth_config = AuthConfig::from_env();
    let import_config = ImportConfig::from_env();

    let dictionary = match std::env::var("DICTUM_ENTITIES") {
        Ok(path) => load_dictionary(&PathBuf::from(path))?,
        Err(_) => {
            tracing::warn!("DICTUM_ENTITIES not set; starting with an empty entity dictionary");
            Dictionary {
                registry: EntityRegistry::new(),
                app_keys: InMemoryAppKeyStore::new(),
            }
        }
    };

    let connections = PgConnectionFactory::from_config(&DbConfig::from_env())?;
    let files = DirectoryFileStorage::new(import_config.file_root.clone());

    let state = AppState::new(
        dictionary.registry,
        Arc::new(connections),
        Arc::new(dictionary.app_keys),
        Arc::new(files),
        auth_config,
        &import_config.process_entity,
    )
    .with_request_timeout(api_config.request_timeout);

    let app: Router = create_api_router(state, &api_config)?;

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting DICTUM API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
