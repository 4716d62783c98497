//! Typed errors and HTTP mapping.

use crate::completion::CompletionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("tenants '{first}' and '{second}' share instance key '{key}'")]
    DuplicateInstanceKey {
        key: String,
        first: String,
        second: String,
    },
    #[error("invalid value for {var}: '{value}'")]
    InvalidVar { var: &'static str, value: String },
}

/// Failures of tenant resolution. None of these are retried.
#[derive(Error, Debug)]
pub enum TenantError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("tenant not configured: {0}")]
    ConfigurationMissing(String),
    #[error("instance construction failed for tenant '{tenant_id}': {source}")]
    InstanceConstruction {
        tenant_id: String,
        #[source]
        source: BackendError,
    },
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend construction: {0}")]
    Construction(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already in use: {0}")]
    EmailInUse(String),
    #[error("not signed in")]
    NotSignedIn,
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    /// Raised by the current-tenant facade when the selected tenant cannot be resolved.
    #[error(transparent)]
    Resolution(Box<TenantError>),
}

impl From<TenantError> for BackendError {
    fn from(e: TenantError) -> Self {
        BackendError::Resolution(Box::new(e))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error(transparent)]
    Backend(BackendError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<BackendError> for AppError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Resolution(t) => AppError::Tenant(*t),
            other => AppError::Backend(other),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn tenant_status(e: &TenantError) -> (StatusCode, &'static str) {
    match e {
        TenantError::UnknownTenant(_) => (StatusCode::NOT_FOUND, "unknown_tenant"),
        TenantError::ConfigurationMissing(_) => (StatusCode::SERVICE_UNAVAILABLE, "tenant_not_configured"),
        TenantError::InstanceConstruction { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "instance_construction_failed")
        }
    }
}

fn backend_status(e: &BackendError) -> (StatusCode, &'static str) {
    match e {
        BackendError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
        BackendError::NotSignedIn => (StatusCode::UNAUTHORIZED, "not_signed_in"),
        BackendError::EmailInUse(_) => (StatusCode::CONFLICT, "email_in_use"),
        BackendError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        BackendError::InvalidDocument(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
        BackendError::Db(sqlx::Error::RowNotFound) => (StatusCode::NOT_FOUND, "not_found"),
        BackendError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        BackendError::Construction(_) => (StatusCode::INTERNAL_SERVER_ERROR, "instance_construction_failed"),
        BackendError::Resolution(t) => tenant_status(t),
    }
}

fn completion_status(e: &CompletionError) -> (StatusCode, &'static str) {
    match e {
        CompletionError::MissingApiKey => (StatusCode::SERVICE_UNAVAILABLE, "completion_unavailable"),
        CompletionError::RegionBlocked => (StatusCode::SERVICE_UNAVAILABLE, "region_blocked"),
        CompletionError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
        CompletionError::Serde(_) | CompletionError::Empty => (StatusCode::BAD_GATEWAY, "invalid_completion"),
        e if e.is_quota() => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        _ => (StatusCode::BAD_GATEWAY, "upstream_error"),
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Tenant(e) => tenant_status(e),
            AppError::Backend(e) => backend_status(e),
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            AppError::Completion(e) => completion_status(e),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
