//! Provisioning checks: real credentials vs placeholders left in the registry.

use crate::error::ConfigError;
use crate::tenant::{TenantCredentials, TenantRegistry};

/// Prefix of an API key that was never filled in (e.g. `PASTE_API_KEY_SDN2_DISINI`).
pub const PLACEHOLDER_PREFIX: &str = "PASTE_";

pub fn credentials_configured(credentials: &TenantCredentials) -> bool {
    match credentials.api_key.as_deref() {
        Some(key) => !key.is_empty() && !key.starts_with(PLACEHOLDER_PREFIX),
        None => false,
    }
}

/// True when `tenant_id` is in the registry and its API key is real.
/// Sign-in for a tenant must not proceed unless this holds.
pub fn is_configured(registry: &TenantRegistry, tenant_id: &str) -> bool {
    registry
        .get(tenant_id)
        .map(credentials_configured)
        .unwrap_or(false)
}

/// The default tenant must exist. An unconfigured default is allowed but makes
/// lenient fallback impossible, so it is logged.
pub fn validate_registry(registry: &TenantRegistry, default_tenant: &str) -> Result<(), ConfigError> {
    if registry.is_empty() {
        return Err(ConfigError::Validation("tenant registry is empty".into()));
    }
    if !registry.contains(default_tenant) {
        return Err(ConfigError::Validation(format!(
            "default tenant '{}' is not in the registry",
            default_tenant
        )));
    }
    if !is_configured(registry, default_tenant) {
        tracing::warn!(tenant = %default_tenant, "default tenant has placeholder credentials");
    }
    let pending = registry
        .iter()
        .filter(|(_, c)| !credentials_configured(c))
        .count();
    tracing::debug!(tenants = registry.len(), pending, "tenant registry validated");
    Ok(())
}
