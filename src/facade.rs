//! Current-tenant clients. Every call re-reads the selected school and forwards to
//! that tenant's instance, so a handle kept across a school switch follows the switch.

use crate::backend::{AuthClient, Document, DocumentStore, FieldFilter, Session};
use crate::connection::ConnectionRegistry;
use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Auth client of whichever tenant is selected at call time.
#[derive(Clone)]
pub struct CurrentAuth {
    connections: Arc<ConnectionRegistry>,
}

impl CurrentAuth {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        CurrentAuth { connections }
    }

    fn target(&self) -> Result<Arc<dyn AuthClient>, BackendError> {
        Ok(self.connections.resolve_current()?.auth())
    }
}

#[async_trait]
impl AuthClient for CurrentAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        self.target()?.sign_in(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        self.target()?.sign_up(email, password).await
    }

    async fn sign_out(&self, token: &str) -> Result<(), BackendError> {
        self.target()?.sign_out(token).await
    }

    /// `None` also when the selected tenant cannot be resolved.
    fn current_user(&self, token: &str) -> Option<Session> {
        match self.target() {
            Ok(auth) => auth.current_user(token),
            Err(e) => {
                tracing::debug!(error = %e, "current_user: no resolvable tenant");
                None
            }
        }
    }
}

/// Document store of whichever tenant is selected at call time.
#[derive(Clone)]
pub struct CurrentStore {
    connections: Arc<ConnectionRegistry>,
}

impl CurrentStore {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        CurrentStore { connections }
    }

    fn target(&self) -> Result<Arc<dyn DocumentStore>, BackendError> {
        Ok(self.connections.resolve_current()?.store())
    }
}

#[async_trait]
impl DocumentStore for CurrentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, BackendError> {
        self.target()?.get(collection, id).await
    }

    async fn list(&self, collection: &str, filter: Option<&FieldFilter>) -> Result<Vec<Document>, BackendError> {
        self.target()?.list(collection, filter).await
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, BackendError> {
        self.target()?.add(collection, data).await
    }

    async fn set(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<(), BackendError> {
        self.target()?.set(collection, id, data, merge).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), BackendError> {
        self.target()?.update(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        self.target()?.delete(collection, id).await
    }
}
