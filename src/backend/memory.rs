//! In-process backend: each app gets its own accounts, sessions and documents.
//! Used for local development and tests.

use crate::backend::{
    into_object, normalize_email, require_project_id, validate_path_segment, AuthClient, Backend, BackendApp,
    Document, DocumentStore, FieldFilter, Session, SessionTable,
};
use crate::error::BackendError;
use crate::tenant::TenantCredentials;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    initialized: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of apps built so far, in order.
    pub fn initialized(&self) -> Vec<String> {
        self.initialized.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Backend for MemoryBackend {
    fn initialize(&self, name: &str, credentials: &TenantCredentials) -> Result<BackendApp, BackendError> {
        let project_id = require_project_id(credentials)?;
        if credentials.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
            return Err(BackendError::Construction("apiKey is required".into()));
        }
        self.initialized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
        tracing::debug!(app = %name, project_id = %project_id, "memory backend app initialized");
        Ok(BackendApp {
            name: name.to_string(),
            auth: Arc::new(MemoryAuth::default()),
            store: Arc::new(MemoryStore::default()),
        })
    }
}

#[derive(Debug)]
struct Account {
    uid: String,
    password: String,
}

#[derive(Debug, Default)]
pub struct MemoryAuth {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: SessionTable,
}

#[async_trait]
impl AuthClient for MemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let email = normalize_email(email)?;
        let uid = {
            let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
            match accounts.get(&email) {
                Some(a) if a.password == password => a.uid.clone(),
                _ => return Err(BackendError::InvalidCredentials),
            }
        };
        Ok(self.sessions.start(uid, email))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(BackendError::InvalidCredentials);
        }
        let uid = uuid::Uuid::new_v4().to_string();
        {
            let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
            if accounts.contains_key(&email) {
                return Err(BackendError::EmailInUse(email));
            }
            accounts.insert(
                email.clone(),
                Account {
                    uid: uid.clone(),
                    password: password.to_string(),
                },
            );
        }
        Ok(self.sessions.start(uid, email))
    }

    async fn sign_out(&self, token: &str) -> Result<(), BackendError> {
        self.sessions.end(token)
    }

    fn current_user(&self, token: &str) -> Option<Session> {
        self.sessions.get(token)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Document>>>,
}

impl MemoryStore {
    /// Applies `f` to the current document data and stores the result, under one write guard.
    fn write_with<F>(&self, collection: &str, id: &str, f: F) -> Result<(), BackendError>
    where
        F: FnOnce(Option<serde_json::Map<String, Value>>) -> Result<serde_json::Map<String, Value>, BackendError>,
    {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();
        let data = f(docs.get(id).map(|d| d.data.clone()))?;
        docs.insert(
            id.to_string(),
            Document {
                id: id.to_string(),
                data,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, BackendError> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn list(&self, collection: &str, filter: Option<&FieldFilter>) -> Result<Vec<Document>, BackendError> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|d| filter.map(|f| f.matches(&d.data)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, BackendError> {
        validate_path_segment("collection", collection)?;
        let data = into_object(data)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.write_with(collection, &id, |_| Ok(data))?;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<(), BackendError> {
        validate_path_segment("collection", collection)?;
        validate_path_segment("document id", id)?;
        let mut data = into_object(data)?;
        self.write_with(collection, id, |existing| match existing {
            Some(mut merged) if merge => {
                merged.append(&mut data);
                Ok(merged)
            }
            _ => Ok(data),
        })
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), BackendError> {
        let mut patch = into_object(patch)?;
        self.write_with(collection, id, |existing| {
            let mut merged = existing.ok_or_else(|| BackendError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            merged.append(&mut patch);
            Ok(merged)
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        if let Some(c) = self
            .collections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(collection)
        {
            c.remove(id);
        }
        Ok(())
    }
}
