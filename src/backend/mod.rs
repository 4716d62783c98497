//! Backend SDK seam: a backend turns one tenant's credentials into an app with
//! an auth client and a document store client.

pub mod memory;
pub mod postgres;

use crate::error::BackendError;
use crate::tenant::TenantCredentials;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use memory::MemoryBackend;
pub use postgres::PgBackend;

/// A signed-in account. `token` is the bearer credential for later calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub uid: String,
    pub email: String,
    pub signed_in_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Equality filter on a top-level document field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldFilter {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;
    /// Creates the account and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError>;
    /// Ends the session; `NotSignedIn` when the token is not live.
    async fn sign_out(&self, token: &str) -> Result<(), BackendError>;
    fn current_user(&self, token: &str) -> Option<Session>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, BackendError>;
    /// Documents ordered by id.
    async fn list(&self, collection: &str, filter: Option<&FieldFilter>) -> Result<Vec<Document>, BackendError>;
    /// Stores under a generated id and returns it.
    async fn add(&self, collection: &str, data: Value) -> Result<String, BackendError>;
    /// Replaces the document, or shallow-merges top-level fields when `merge` is set.
    async fn set(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<(), BackendError>;
    /// Shallow-merges into an existing document; `NotFound` if absent.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), BackendError>;
    /// No-op when the document does not exist.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError>;
}

/// One initialized backend application, registered under `name`.
#[derive(Clone)]
pub struct BackendApp {
    pub name: String,
    pub auth: Arc<dyn AuthClient>,
    pub store: Arc<dyn DocumentStore>,
}

/// Builds backend apps. `initialize` must not perform network I/O.
pub trait Backend: Send + Sync {
    fn initialize(&self, name: &str, credentials: &TenantCredentials) -> Result<BackendApp, BackendError>;
}

/// Live sessions of one backend app, keyed by token.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    by_token: RwLock<HashMap<String, Session>>,
}

impl SessionTable {
    pub(crate) fn start(&self, uid: impl Into<String>, email: impl Into<String>) -> Session {
        let session = Session {
            token: uuid::Uuid::new_v4().simple().to_string(),
            uid: uid.into(),
            email: email.into(),
            signed_in_at: Utc::now(),
        };
        self.by_token
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.token.clone(), session.clone());
        session
    }

    pub(crate) fn get(&self, token: &str) -> Option<Session> {
        self.by_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned()
    }

    pub(crate) fn end(&self, token: &str) -> Result<(), BackendError> {
        self.by_token
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token)
            .map(|_| ())
            .ok_or(BackendError::NotSignedIn)
    }
}

/// Rejects bundles the SDK cannot build an app from.
pub(crate) fn require_project_id(credentials: &TenantCredentials) -> Result<&str, BackendError> {
    credentials
        .project_id
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| BackendError::Construction("projectId is required".into()))
}

pub(crate) fn into_object(data: Value) -> Result<Map<String, Value>, BackendError> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::InvalidDocument(format!(
            "document data must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn normalize_email(email: &str) -> Result<String, BackendError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(BackendError::InvalidCredentials);
    }
    Ok(email)
}

pub(crate) fn validate_path_segment(kind: &str, segment: &str) -> Result<(), BackendError> {
    if segment.is_empty() || segment.contains('/') {
        return Err(BackendError::InvalidDocument(format!("invalid {}: '{}'", kind, segment)));
    }
    Ok(())
}
