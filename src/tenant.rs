//! Tenant registry: per-school credential bundles, compiled in or loaded from a JSON file.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Connection parameters for one school's isolated backend project.
/// Field names follow the backend SDK's camelCase config keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub storage_bucket: Option<String>,
    #[serde(default)]
    pub messaging_sender_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    /// Used by the PostgreSQL backend; takes precedence over the URL template.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl TenantCredentials {
    /// Bundle with only the fields needed to decide whether it is provisioned.
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        TenantCredentials {
            api_key: Some(api_key.into()),
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

/// Name under which a tenant's backend instance is registered: every whitespace
/// character becomes `_`. Two ids collide only when they differ by that substitution.
pub fn instance_key(tenant_id: &str) -> String {
    tenant_id
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Immutable tenant registry. Lookups are exact string matches on the school name.
#[derive(Clone, Debug, Default)]
pub struct TenantRegistry {
    by_id: BTreeMap<String, TenantCredentials>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        TenantRegistry {
            by_id: BTreeMap::new(),
        }
    }

    /// Build from (tenant id, bundle) pairs. Rejects duplicate ids and ids that
    /// would share an instance key.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, TenantCredentials)>,
        S: Into<String>,
    {
        let mut by_id = BTreeMap::new();
        let mut keys: HashMap<String, String> = HashMap::new();
        for (id, credentials) in entries {
            let id: String = id.into();
            let key = instance_key(&id);
            if let Some(first) = keys.get(&key) {
                if *first == id {
                    return Err(ConfigError::Validation(format!("duplicate tenant id: {}", id)));
                }
                return Err(ConfigError::DuplicateInstanceKey {
                    key,
                    first: first.clone(),
                    second: id,
                });
            }
            keys.insert(key, id.clone());
            by_id.insert(id, credentials);
        }
        Ok(TenantRegistry { by_id })
    }

    /// Parse a JSON object of `{ "<school name>": { "apiKey": ..., ... } }`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, TenantCredentials> =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(format!("tenant registry: {}", e)))?;
        Self::from_entries(raw)
    }

    pub fn get(&self, tenant_id: &str) -> Option<&TenantCredentials> {
        self.by_id.get(tenant_id)
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.by_id.contains_key(tenant_id)
    }

    /// Tenants in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TenantCredentials)> {
        self.by_id.iter().map(|(id, c)| (id.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
