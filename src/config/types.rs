//! Runtime settings for tenant routing and the server surface.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;

/// School used when no tenant has been selected yet.
pub const DEFAULT_TENANT: &str = "SD NEGERI 1 BILATO";

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

pub const DEFAULT_PG_SCHEMA: &str = "sekolah";

/// What resolution does when the selected tenant exists but is still a placeholder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Fail with `TenantError::ConfigurationMissing`.
    #[default]
    Strict,
    /// Serve the selected tenant from the default tenant's credentials.
    Lenient,
}

impl FromStr for FallbackPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(FallbackPolicy::Strict),
            "lenient" => Ok(FallbackPolicy::Lenient),
            _ => Err(ConfigError::InvalidVar {
                var: "TENANT_FALLBACK",
                value: s.to_string(),
            }),
        }
    }
}

/// Which backend SDK the connection registry builds instances with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            _ => Err(ConfigError::InvalidVar {
                var: "TENANT_BACKEND",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub default_tenant: String,
    pub fallback: FallbackPolicy,
    /// JSON registry replacing the compiled-in one.
    pub registry_path: Option<PathBuf>,
    /// File backing the selected-tenant store; in-memory when unset.
    pub selection_path: Option<PathBuf>,
    pub backend: BackendKind,
    /// Postgres URL with a `{project_id}` placeholder, for tenants without `databaseUrl`.
    pub database_url_template: Option<String>,
    pub pg_schema: String,
    pub bind_addr: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_tenant: DEFAULT_TENANT.to_string(),
            fallback: FallbackPolicy::Strict,
            registry_path: None,
            selection_path: None,
            backend: BackendKind::Memory,
            database_url_template: None,
            pg_schema: DEFAULT_PG_SCHEMA.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            gemini_api_key: None,
            gemini_model: None,
        }
    }
}
