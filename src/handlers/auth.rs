//! Sign-in against the selected school's backend. Sign-in and sign-up return a session
//! token; `me` and sign-out act only on the session named by the caller's bearer token.

use crate::error::{AppError, BackendError, TenantError};
use crate::extractors::session::SessionToken;
use crate::extractors::tenant::SelectedTenant;
use crate::response::tenant_one;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CredentialsBody {
    pub email: String,
    pub password: String,
}

/// Sign-in and sign-up refuse unprovisioned schools even under lenient fallback.
fn require_configured(state: &AppState, tenant: Option<&str>) -> Result<String, AppError> {
    let tenant_id = state.connections.effective_tenant(tenant);
    if !state.connections.tenants().contains(&tenant_id) {
        return Err(TenantError::UnknownTenant(tenant_id).into());
    }
    if !state.connections.is_configured(&tenant_id) {
        return Err(TenantError::ConfigurationMissing(tenant_id).into());
    }
    Ok(tenant_id)
}

/// POST /api/v1/auth/sign-in
pub async fn sign_in(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = require_configured(&state, tenant.as_deref())?;
    let instance = state.connections.resolve(Some(tenant_id.as_str()))?;
    let session = instance.auth().sign_in(&body.email, &body.password).await?;
    tracing::info!(tenant = %instance.tenant_id(), uid = %session.uid, "signed in");
    Ok(tenant_one(StatusCode::OK, &instance, session))
}

/// POST /api/v1/auth/sign-up
pub async fn sign_up(
    SelectedTenant(tenant): SelectedTenant,
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = require_configured(&state, tenant.as_deref())?;
    let instance = state.connections.resolve(Some(tenant_id.as_str()))?;
    let session = instance.auth().sign_up(&body.email, &body.password).await?;
    tracing::info!(tenant = %instance.tenant_id(), uid = %session.uid, "account created");
    Ok(tenant_one(StatusCode::CREATED, &instance, session))
}

/// POST /api/v1/auth/sign-out
pub async fn sign_out(
    SelectedTenant(tenant): SelectedTenant,
    SessionToken(token): SessionToken,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let token = token.ok_or(BackendError::NotSignedIn)?;
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    instance.auth().sign_out(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/me
pub async fn current_user(
    SelectedTenant(tenant): SelectedTenant,
    SessionToken(token): SessionToken,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let token = token.ok_or(BackendError::NotSignedIn)?;
    let instance = state.connections.resolve_selected(tenant.as_deref())?;
    let session = instance
        .auth()
        .current_user(&token)
        .ok_or(BackendError::NotSignedIn)?;
    Ok(tenant_one(StatusCode::OK, &instance, session))
}
