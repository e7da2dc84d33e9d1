//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dictum_core::EntityRegistry;
use dictum_storage::{AppKeyStore, ConnectionFactory, FileStorage};

use crate::auth::AuthConfig;
use crate::engine::BatchEngine;
use crate::import::ImportPipeline;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BatchEngine>,
    pub importer: Arc<ImportPipeline>,
    pub registry: Arc<EntityRegistry>,
    pub connections: Arc<dyn ConnectionFactory>,
    pub auth_config: Arc<AuthConfig>,
    /// Budget for one entity request; past it the call is cancelled.
    pub request_timeout: Duration,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the engine and import pipeline over the given collaborators.
    ///
    /// The import-process entity is registered when the registry lacks it.
    pub fn new(
        mut registry: EntityRegistry,
        connections: Arc<dyn ConnectionFactory>,
        app_keys: Arc<dyn AppKeyStore>,
        files: Arc<dyn FileStorage>,
        auth_config: AuthConfig,
        process_entity: &str,
    ) -> Self {
        if !registry.contains(process_entity) {
            registry.register(crate::import::process_definition(process_entity));
        }
        let registry = Arc::new(registry);
        let engine = Arc::new(BatchEngine::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            app_keys,
        ));
        let importer = Arc::new(ImportPipeline::new(
            Arc::clone(&engine),
            files,
            process_entity,
        ));
        Self {
            engine,
            importer,
            registry,
            connections,
            auth_config: Arc::new(auth_config),
            request_timeout: Duration::from_secs(30),
            start_time: Instant::now(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(Arc<BatchEngine>, engine);
crate::impl_from_ref!(Arc<ImportPipeline>, importer);
crate::impl_from_ref!(Arc<EntityRegistry>, registry);
crate::impl_from_ref!(Arc<dyn ConnectionFactory>, connections);
crate::impl_from_ref!(Arc<AuthConfig>, auth_config);
crate::impl_from_ref!(Instant, start_time);
