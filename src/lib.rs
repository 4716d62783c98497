//! Sekolah SDK: per-school backend routing for the perangkat pembelajaran service.
//!
//! Each school (tenant) owns an isolated backend project. The [`ConnectionRegistry`]
//! maps the selected school to a lazily-built, process-wide backend instance, and
//! [`CurrentAuth`] / [`CurrentStore`] forward every call to whichever school is
//! selected at that moment.

pub mod backend;
pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod extractors;
pub mod facade;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod selection;
pub mod state;
pub mod tenant;

pub use backend::{AuthClient, Backend, BackendApp, Document, DocumentStore, FieldFilter, MemoryBackend, PgBackend, Session};
pub use completion::{CompletionError, CompletionRequest, CompletionService, GeminiClient};
pub use config::{is_configured, load_registry, FallbackPolicy, Settings, DEFAULT_TENANT, PLACEHOLDER_PREFIX};
pub use connection::{ConnectionRegistry, TenantInstance};
pub use error::{AppError, BackendError, ConfigError, StorageError, TenantError};
pub use facade::{CurrentAuth, CurrentStore};
pub use routes::{
    api_router, auth_routes, common_routes, common_routes_with_ready, completion_routes, document_routes, tenant_routes,
};
pub use selection::{FileStorage, KeyValueStore, MemoryStorage, SELECTED_TENANT_KEY};
pub use state::AppState;
pub use tenant::{instance_key, TenantCredentials, TenantRegistry};
