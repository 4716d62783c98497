//! PostgreSQL backend: one lazily-connecting pool per tenant database. Documents are JSONB
//! rows keyed by (collection, id); accounts use pgcrypto password hashes. Tables live in the
//! schema named by `SEKOLAH_SCHEMA` (default `sekolah`) and are created on first use.

use crate::backend::{
    into_object, normalize_email, require_project_id, validate_path_segment, AuthClient, Backend, BackendApp,
    Document, DocumentStore, FieldFilter, Session, SessionTable,
};
use crate::config::DEFAULT_PG_SCHEMA;
use crate::error::BackendError;
use crate::tenant::TenantCredentials;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgBackend {
    schema: String,
    url_template: Option<String>,
    max_connections: u32,
}

impl Default for PgBackend {
    fn default() -> Self {
        PgBackend::new(DEFAULT_PG_SCHEMA)
    }
}

impl PgBackend {
    pub fn new(schema: impl Into<String>) -> Self {
        PgBackend {
            schema: schema.into(),
            url_template: None,
            max_connections: 5,
        }
    }

    /// Template with a `{project_id}` placeholder, used for tenants without `databaseUrl`.
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = Some(template.into());
        self
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn database_url(&self, credentials: &TenantCredentials) -> Result<String, BackendError> {
        if let Some(url) = credentials.database_url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }
        let project_id = require_project_id(credentials)?;
        match &self.url_template {
            Some(template) => Ok(template.replace("{project_id}", project_id)),
            None => Err(BackendError::Construction(
                "databaseUrl is required when no URL template is configured".into(),
            )),
        }
    }
}

impl Backend for PgBackend {
    /// Builds the pool without connecting; must be called inside a tokio runtime.
    fn initialize(&self, name: &str, credentials: &TenantCredentials) -> Result<BackendApp, BackendError> {
        let url = self.database_url(credentials)?;
        let options = PgConnectOptions::from_str(&url)
            .map_err(|e| BackendError::Construction(format!("invalid database url: {}", e)))?
            .application_name(name);
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_lazy_with(options);
        tracing::debug!(app = %name, "postgres backend app initialized");
        let shared = Arc::new(PgShared {
            pool,
            schema: self.schema.clone(),
            ready: OnceCell::new(),
        });
        Ok(BackendApp {
            name: name.to_string(),
            auth: Arc::new(PgAuth {
                shared: shared.clone(),
                sessions: SessionTable::default(),
            }),
            store: Arc::new(PgStore { shared }),
        })
    }
}

struct PgShared {
    pool: PgPool,
    schema: String,
    ready: OnceCell<()>,
}

impl PgShared {
    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    async fn pool(&self) -> Result<&PgPool, BackendError> {
        self.ready
            .get_or_try_init(|| ensure_tables(&self.pool, &self.schema))
            .await?;
        Ok(&self.pool)
    }
}

async fn ensure_tables(pool: &PgPool, schema: &str) -> Result<(), BackendError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(pool)
        .await?;
    sqlx::query("CREATE EXTENSION IF NOT EXISTS pgcrypto")
        .execute(pool)
        .await?;
    let documents = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}._sys_documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (collection, id)
        )
        "#,
        schema
    );
    sqlx::query(&documents).execute(pool).await?;
    let accounts = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}._sys_accounts (
            uid UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        schema
    );
    sqlx::query(&accounts).execute(pool).await?;
    tracing::info!(schema = %schema, "tenant tables ensured");
    Ok(())
}

/// Accounts live in the tenant database; sessions are held in process.
struct PgAuth {
    shared: Arc<PgShared>,
    sessions: SessionTable,
}

#[async_trait]
impl AuthClient for PgAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let email = normalize_email(email)?;
        let pool = self.shared.pool().await?;
        let sql = format!(
            "SELECT uid FROM {} WHERE email = $1 AND password_hash = crypt($2, password_hash)",
            self.shared.table("_sys_accounts")
        );
        let uid: Option<Uuid> = sqlx::query_scalar(&sql)
            .bind(&email)
            .bind(password)
            .fetch_optional(pool)
            .await?;
        let uid = uid.ok_or(BackendError::InvalidCredentials)?;
        Ok(self.sessions.start(uid.to_string(), email))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(BackendError::InvalidCredentials);
        }
        let pool = self.shared.pool().await?;
        let sql = format!(
            "INSERT INTO {} (uid, email, password_hash) VALUES ($1, $2, crypt($3, gen_salt('bf'))) \
             ON CONFLICT (email) DO NOTHING RETURNING uid",
            self.shared.table("_sys_accounts")
        );
        let uid: Option<Uuid> = sqlx::query_scalar(&sql)
            .bind(Uuid::new_v4())
            .bind(&email)
            .bind(password)
            .fetch_optional(pool)
            .await?;
        match uid {
            Some(uid) => Ok(self.sessions.start(uid.to_string(), email)),
            None => Err(BackendError::EmailInUse(email)),
        }
    }

    async fn sign_out(&self, token: &str) -> Result<(), BackendError> {
        self.sessions.end(token)
    }

    fn current_user(&self, token: &str) -> Option<Session> {
        self.sessions.get(token)
    }
}

struct PgStore {
    shared: Arc<PgShared>,
}

type DocumentRow = (String, Value, DateTime<Utc>);

fn row_to_document((id, data, updated_at): DocumentRow) -> Result<Document, BackendError> {
    Ok(Document {
        id,
        data: into_object(data)?,
        updated_at,
    })
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, BackendError> {
        let pool = self.shared.pool().await?;
        let sql = format!(
            "SELECT id, data, updated_at FROM {} WHERE collection = $1 AND id = $2",
            self.shared.table("_sys_documents")
        );
        let row: Option<DocumentRow> = sqlx::query_as(&sql)
            .bind(collection)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.map(row_to_document).transpose()
    }

    async fn list(&self, collection: &str, filter: Option<&FieldFilter>) -> Result<Vec<Document>, BackendError> {
        let pool = self.shared.pool().await?;
        let table = self.shared.table("_sys_documents");
        let rows: Vec<DocumentRow> = match filter {
            Some(f) => {
                let sql = format!(
                    "SELECT id, data, updated_at FROM {} WHERE collection = $1 AND data -> $2 = $3 ORDER BY id",
                    table
                );
                sqlx::query_as(&sql)
                    .bind(collection)
                    .bind(&f.field)
                    .bind(Json(&f.value))
                    .fetch_all(pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT id, data, updated_at FROM {} WHERE collection = $1 ORDER BY id",
                    table
                );
                sqlx::query_as(&sql).bind(collection).fetch_all(pool).await?
            }
        };
        rows.into_iter().map(row_to_document).collect()
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, BackendError> {
        validate_path_segment("collection", collection)?;
        let data = into_object(data)?;
        let pool = self.shared.pool().await?;
        let id = Uuid::new_v4().simple().to_string();
        let sql = format!(
            "INSERT INTO {} (collection, id, data) VALUES ($1, $2, $3)",
            self.shared.table("_sys_documents")
        );
        sqlx::query(&sql)
            .bind(collection)
            .bind(&id)
            .bind(Json(&data))
            .execute(pool)
            .await?;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value, merge: bool) -> Result<(), BackendError> {
        validate_path_segment("collection", collection)?;
        validate_path_segment("document id", id)?;
        let data = into_object(data)?;
        let pool = self.shared.pool().await?;
        let on_conflict = if merge {
            "d.data || EXCLUDED.data"
        } else {
            "EXCLUDED.data"
        };
        let sql = format!(
            "INSERT INTO {} AS d (collection, id, data) VALUES ($1, $2, $3) \
             ON CONFLICT (collection, id) DO UPDATE SET data = {}, updated_at = NOW()",
            self.shared.table("_sys_documents"),
            on_conflict
        );
        sqlx::query(&sql)
            .bind(collection)
            .bind(id)
            .bind(Json(&data))
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), BackendError> {
        let patch = into_object(patch)?;
        let pool = self.shared.pool().await?;
        let sql = format!(
            "UPDATE {} SET data = data || $3, updated_at = NOW() WHERE collection = $1 AND id = $2",
            self.shared.table("_sys_documents")
        );
        let result = sqlx::query(&sql)
            .bind(collection)
            .bind(id)
            .bind(Json(&patch))
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let pool = self.shared.pool().await?;
        let sql = format!(
            "DELETE FROM {} WHERE collection = $1 AND id = $2",
            self.shared.table("_sys_documents")
        );
        sqlx::query(&sql).bind(collection).bind(id).execute(pool).await?;
        Ok(())
    }
}
