//! Shared application state for all routes, built once at startup.

use crate::backend::{Backend, MemoryBackend, PgBackend};
use crate::completion::{CompletionError, CompletionService, GeminiClient};
use crate::config::{load_registry, BackendKind, Settings};
use crate::connection::ConnectionRegistry;
use crate::error::ConfigError;
use crate::selection::{FileStorage, KeyValueStore, MemoryStorage};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Tenant registry plus the per-school instance cache.
    pub connections: Arc<ConnectionRegistry>,
    /// Unset when no Gemini key is configured; completion routes then answer 503.
    pub completion: Option<Arc<dyn CompletionService>>,
}

impl AppState {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        AppState {
            connections,
            completion: None,
        }
    }

    pub fn with_completion(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(service);
        self
    }

    /// Registry, backend and selection store as described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let tenants = Arc::new(load_registry(settings)?);
        let backend: Arc<dyn Backend> = match settings.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Postgres => {
                let mut pg = PgBackend::new(settings.pg_schema.clone());
                if let Some(template) = &settings.database_url_template {
                    pg = pg.with_url_template(template.clone());
                }
                Arc::new(pg)
            }
        };
        let selection: Arc<dyn KeyValueStore> = match &settings.selection_path {
            Some(path) => Arc::new(FileStorage::new(path.clone())),
            None => Arc::new(MemoryStorage::new()),
        };
        tracing::info!(
            tenants = tenants.len(),
            backend = ?settings.backend,
            fallback = ?settings.fallback,
            default_tenant = %settings.default_tenant,
            "tenant routing configured"
        );
        let connections = ConnectionRegistry::from_settings(settings, tenants, backend, selection);
        let state = AppState::new(Arc::new(connections));
        match GeminiClient::from_settings(settings) {
            Ok(client) => {
                tracing::info!(model = %client.model(), "completion service enabled");
                Ok(state.with_completion(Arc::new(client)))
            }
            Err(CompletionError::MissingApiKey) => {
                tracing::info!("GEMINI_API_KEY not set, completion service disabled");
                Ok(state)
            }
            Err(e) => Err(ConfigError::Validation(format!("completion client: {}", e))),
        }
    }
}
