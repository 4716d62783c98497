//! Tenant directory, provisioning status and school selection.

use crate::error::{AppError, TenantError};
use crate::extractors::tenant::{selection_cookie, SelectedTenant};
use crate::response::{success_many, success_one_ok, tenant_one};
use crate::selection::select_tenant as store_selection;
use crate::state::AppState;
use crate::tenant::instance_key;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Public view of a registry entry. API keys are never returned.
#[derive(Serialize)]
pub struct TenantSummary {
    pub tenant_id: String,
    pub instance_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    pub configured: bool,
    /// Whether an instance has been created for this tenant in this process.
    pub connected: bool,
}

fn summary(state: &AppState, tenant_id: &str) -> Option<TenantSummary> {
    let credentials = state.connections.tenants().get(tenant_id)?;
    let key = instance_key(tenant_id);
    Some(TenantSummary {
        tenant_id: tenant_id.to_string(),
        connected: state.connections.cached(&key).is_some(),
        instance_key: key,
        project_id: credentials.project_id.clone(),
        auth_domain: credentials.auth_domain.clone(),
        configured: state.connections.is_configured(tenant_id),
    })
}

/// GET /api/v1/tenants
pub async fn list_tenants(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<TenantSummary> = state
        .connections
        .tenants()
        .iter()
        .filter_map(|(id, _)| summary(&state, id))
        .collect();
    success_many(data)
}

/// GET /api/v1/tenants/:tenant_id/status
pub async fn tenant_status(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let data = summary(&state, &tenant_id).ok_or(TenantError::UnknownTenant(tenant_id))?;
    Ok(success_one_ok(data))
}

#[derive(Deserialize)]
pub struct SelectBody {
    pub tenant_id: String,
}

/// POST /api/v1/tenants/select: only provisioned schools may be selected. The choice is
/// written to the selection store and returned as a cookie.
pub async fn select_tenant(
    State(state): State<AppState>,
    Json(body): Json<SelectBody>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = body.tenant_id;
    if !state.connections.tenants().contains(&tenant_id) {
        return Err(TenantError::UnknownTenant(tenant_id).into());
    }
    if !state.connections.is_configured(&tenant_id) {
        return Err(TenantError::ConfigurationMissing(tenant_id).into());
    }
    store_selection(state.connections.selection().as_ref(), &tenant_id)?;
    tracing::info!(tenant = %tenant_id, "school selected");
    let cookie = selection_cookie(&tenant_id);
    let data = summary(&state, &tenant_id);
    Ok(([(header::SET_COOKIE, cookie)], success_one_ok(data)))
}

#[derive(Serialize)]
pub struct CurrentTenant {
    pub tenant_id: String,
    pub credentials_tenant: String,
    pub instance_key: String,
    pub fallback: bool,
}

/// GET /api/v1/tenants/current: resolves (and if needed creates) the caller's instance.
pub async fn current_tenant(
    SelectedTenant(selected): SelectedTenant,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.connections.resolve_selected(selected.as_deref())?;
    let data = CurrentTenant {
        tenant_id: instance.tenant_id().to_string(),
        credentials_tenant: instance.credentials_tenant().to_string(),
        instance_key: instance.instance_key().to_string(),
        fallback: instance.is_fallback(),
    };
    Ok(tenant_one(StatusCode::OK, &instance, data))
}
