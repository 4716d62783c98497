//! Per-tenant connection multiplexing. Each school gets at most one backend app per process,
//! registered under its instance key and kept until shutdown.

use crate::backend::{AuthClient, Backend, BackendApp, DocumentStore};
use crate::config::{credentials_configured, FallbackPolicy, Settings};
use crate::error::TenantError;
use crate::selection::{selected_tenant, KeyValueStore};
use crate::tenant::{instance_key, TenantCredentials, TenantRegistry};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A live backend app bound to one tenant.
pub struct TenantInstance {
    tenant_id: String,
    credentials_tenant: String,
    app: BackendApp,
    created_at: DateTime<Utc>,
}

impl TenantInstance {
    /// The tenant this instance serves.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The tenant whose credentials back this instance. Differs from `tenant_id`
    /// only after a lenient fallback.
    pub fn credentials_tenant(&self) -> &str {
        &self.credentials_tenant
    }

    pub fn is_fallback(&self) -> bool {
        self.tenant_id != self.credentials_tenant
    }

    pub fn instance_key(&self) -> &str {
        &self.app.name
    }

    pub fn auth(&self) -> Arc<dyn AuthClient> {
        self.app.auth.clone()
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.app.store.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Debug for TenantInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantInstance")
            .field("tenant_id", &self.tenant_id)
            .field("credentials_tenant", &self.credentials_tenant)
            .field("instance_key", &self.app.name)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Owns the instance cache. Construct once at the composition root and share via `Arc`.
pub struct ConnectionRegistry {
    tenants: Arc<TenantRegistry>,
    backend: Arc<dyn Backend>,
    selection: Arc<dyn KeyValueStore>,
    default_tenant: String,
    fallback: FallbackPolicy,
    instances: RwLock<HashMap<String, Arc<TenantInstance>>>,
}

impl ConnectionRegistry {
    pub fn new(
        tenants: Arc<TenantRegistry>,
        backend: Arc<dyn Backend>,
        selection: Arc<dyn KeyValueStore>,
        default_tenant: impl Into<String>,
    ) -> Self {
        ConnectionRegistry {
            tenants,
            backend,
            selection,
            default_tenant: default_tenant.into(),
            fallback: FallbackPolicy::Strict,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        tenants: Arc<TenantRegistry>,
        backend: Arc<dyn Backend>,
        selection: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::new(tenants, backend, selection, settings.default_tenant.clone()).with_fallback(settings.fallback)
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }

    pub fn selection(&self) -> &Arc<dyn KeyValueStore> {
        &self.selection
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn is_configured(&self, tenant_id: &str) -> bool {
        crate::config::is_configured(&self.tenants, tenant_id)
    }

    /// Instance for the tenant in the selection store (the default when nothing is selected).
    /// The store is read on every call.
    pub fn resolve_current(&self) -> Result<Arc<TenantInstance>, TenantError> {
        let selected = selected_tenant(self.selection.as_ref());
        self.resolve(selected.as_deref())
    }

    /// Tenant a request is served by: the explicit choice, else the selection store,
    /// else the default tenant.
    pub fn effective_tenant(&self, explicit: Option<&str>) -> String {
        explicit
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| selected_tenant(self.selection.as_ref()))
            .unwrap_or_else(|| self.default_tenant.clone())
    }

    /// Instance for an explicit tenant, falling back to `resolve_current` when `None`.
    pub fn resolve_selected(&self, explicit: Option<&str>) -> Result<Arc<TenantInstance>, TenantError> {
        match explicit.filter(|t| !t.is_empty()) {
            Some(tenant_id) => self.resolve(Some(tenant_id)),
            None => self.resolve_current(),
        }
    }

    /// Instance for `tenant_id`, or the default tenant when `None` or empty.
    /// Repeated calls for one tenant return the same `Arc`.
    pub fn resolve(&self, tenant_id: Option<&str>) -> Result<Arc<TenantInstance>, TenantError> {
        let tenant_id = tenant_id
            .filter(|t| !t.is_empty())
            .unwrap_or(self.default_tenant.as_str());
        // Instance keys are not injective over arbitrary strings; only registered ids may hit the cache.
        if !self.tenants.contains(tenant_id) {
            return Err(TenantError::UnknownTenant(tenant_id.to_string()));
        }
        let key = instance_key(tenant_id);

        if let Some(instance) = self.cached(&key) {
            tracing::debug!(tenant = %tenant_id, key = %key, "tenant instance cache hit");
            return Ok(instance);
        }

        let (credentials_tenant, credentials) = self.credentials_for(tenant_id)?;

        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        if let Some(instance) = instances.get(&key) {
            return Ok(instance.clone());
        }
        let app = self
            .backend
            .initialize(&key, credentials)
            .map_err(|source| TenantError::InstanceConstruction {
                tenant_id: tenant_id.to_string(),
                source,
            })?;
        let instance = Arc::new(TenantInstance {
            tenant_id: tenant_id.to_string(),
            credentials_tenant: credentials_tenant.to_string(),
            app,
            created_at: Utc::now(),
        });
        instances.insert(key.clone(), instance.clone());
        tracing::info!(
            tenant = %tenant_id,
            key = %key,
            credentials = %credentials_tenant,
            "tenant instance created"
        );
        Ok(instance)
    }

    /// Instance keys created so far.
    pub fn instance_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn cached(&self, key: &str) -> Option<Arc<TenantInstance>> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn credentials_for<'a>(&'a self, tenant_id: &'a str) -> Result<(&'a str, &'a TenantCredentials), TenantError> {
        let credentials = self
            .tenants
            .get(tenant_id)
            .ok_or_else(|| TenantError::UnknownTenant(tenant_id.to_string()))?;
        if credentials_configured(credentials) {
            return Ok((tenant_id, credentials));
        }
        match self.fallback {
            FallbackPolicy::Strict => Err(TenantError::ConfigurationMissing(tenant_id.to_string())),
            FallbackPolicy::Lenient => {
                let default = self
                    .tenants
                    .get(&self.default_tenant)
                    .filter(|c| credentials_configured(c))
                    .ok_or_else(|| TenantError::ConfigurationMissing(self.default_tenant.clone()))?;
                tracing::warn!(
                    tenant = %tenant_id,
                    default = %self.default_tenant,
                    "tenant not configured, falling back to default tenant credentials"
                );
                Ok((self.default_tenant.as_str(), default))
            }
        }
    }
}
