//! Load settings from the environment and the tenant registry from the embedded table or a file.

use crate::config::types::{BackendKind, FallbackPolicy, Settings};
use crate::config::validate_registry;
use crate::error::ConfigError;
use crate::tenant::TenantRegistry;
use regex::Regex;
use std::path::{Path, PathBuf};

const BUILTIN_REGISTRY: &str = include_str!("tenants.json");

impl Settings {
    /// Read settings from process env (after loading `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        let fallback = match get("TENANT_FALLBACK") {
            Some(v) => v.parse::<FallbackPolicy>()?,
            None => defaults.fallback,
        };
        let backend = match get("TENANT_BACKEND") {
            Some(v) => v.parse::<BackendKind>()?,
            None => defaults.backend,
        };
        let pg_schema = get("SEKOLAH_SCHEMA").unwrap_or(defaults.pg_schema);
        let ident =
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| ConfigError::Validation(e.to_string()))?;
        if !ident.is_match(&pg_schema) {
            return Err(ConfigError::InvalidVar {
                var: "SEKOLAH_SCHEMA",
                value: pg_schema,
            });
        }
        let database_url_template = get("TENANT_DATABASE_URL_TEMPLATE");
        if let Some(t) = &database_url_template {
            if !t.contains("{project_id}") {
                return Err(ConfigError::InvalidVar {
                    var: "TENANT_DATABASE_URL_TEMPLATE",
                    value: t.clone(),
                });
            }
        }

        Ok(Settings {
            default_tenant: get("DEFAULT_TENANT").unwrap_or(defaults.default_tenant),
            fallback,
            registry_path: get("TENANT_REGISTRY_PATH").map(PathBuf::from),
            selection_path: get("SELECTION_STORE_PATH").map(PathBuf::from),
            backend,
            database_url_template,
            pg_schema,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL"),
        })
    }
}

/// The registry compiled into the binary.
pub fn builtin_registry() -> Result<TenantRegistry, ConfigError> {
    TenantRegistry::from_json(BUILTIN_REGISTRY)
}

pub fn registry_from_path(path: &Path) -> Result<TenantRegistry, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    TenantRegistry::from_json(&raw)
}

/// Registry for these settings: the file at `registry_path` if set, else the builtin table.
/// Validated against `default_tenant`.
pub fn load_registry(settings: &Settings) -> Result<TenantRegistry, ConfigError> {
    let registry = match &settings.registry_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading tenant registry from file");
            registry_from_path(path)?
        }
        None => builtin_registry()?,
    };
    validate_registry(&registry, &settings.default_tenant)?;
    Ok(registry)
}
