//! Document API for the selected school: collections of JSON objects keyed by id.

use crate::backend::FieldFilter;
use crate::error::{AppError, BackendError};
use crate::extractors::tenant::SelectedTenant;
use crate::response::{tenant_many, tenant_one};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub struct ListQuery {
    pub field: Option<String>,
    /// Parsed as JSON when possible (`3`, `true`), otherwise matched as a string.
    pub value: Option<String>,
}

impl ListQuery {
    fn filter(self) -> Result<Option<FieldFilter>, AppError> {
        match (self.field, self.value) {
            (None, None) => Ok(None),
            (Some(field), Some(value)) if !field.is_empty() => {
                let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
                Ok(Some(FieldFilter { field, value }))
            }
            _ => Err(AppError::BadRequest(
                "filter needs both 'field' and 'value' query parameters".into(),
            )),
        }
    }
}

#[derive(Deserialize)]
pub struct SetQuery {
    #[serde(default)]
    pub merge: bool,
}

/// GET /api/v1/documents/:collection
pub async fn list_documents(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.filter()?;
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    let docs = instance.store().list(&collection, filter.as_ref()).await?;
    Ok(tenant_many(&instance, docs))
}

/// POST /api/v1/documents/:collection
pub async fn add_document(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    let id = instance.store().add(&collection, body).await?;
    Ok(tenant_one(StatusCode::CREATED, &instance, serde_json::json!({ "id": id })))
}

/// GET /api/v1/documents/:collection/:id
pub async fn get_document(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    let doc = instance
        .store()
        .get(&collection, &id)
        .await?
        .ok_or(BackendError::NotFound { collection, id })?;
    Ok(tenant_one(StatusCode::OK, &instance, doc))
}

/// PUT /api/v1/documents/:collection/:id[?merge=true]
pub async fn set_document(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<SetQuery>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    let store = instance.store();
    store.set(&collection, &id, body, query.merge).await?;
    let doc = store.get(&collection, &id).await?;
    Ok(tenant_one(StatusCode::OK, &instance, doc))
}

/// PATCH /api/v1/documents/:collection/:id
pub async fn update_document(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    let store = instance.store();
    store.update(&collection, &id, body).await?;
    let doc = store.get(&collection, &id).await?;
    Ok(tenant_one(StatusCode::OK, &instance, doc))
}

/// DELETE /api/v1/documents/:collection/:id
pub async fn delete_document(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    instance.store().delete(&collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
