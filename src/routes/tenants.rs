//! Tenant routes: directory, status, selection, current.

use crate::handlers::tenants::{current_tenant, list_tenants, select_tenant, tenant_status};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn tenant_routes(state: AppState) -> Router {
    Router::new()
        .route("/tenants", get(list_tenants))
        .route("/tenants/current", get(current_tenant))
        .route("/tenants/select", post(select_tenant))
        .route("/tenants/:tenant_id/status", get(tenant_status))
        .with_state(state)
}
