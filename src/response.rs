//! Standard response envelope helpers. Tenant-scoped responses carry the serving
//! school in `meta` so clients can tell which backend answered.

use crate::connection::TenantInstance;
use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Serialize)]
pub struct MetaCount {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

fn tenant_meta(instance: &TenantInstance) -> serde_json::Value {
    serde_json::json!({
        "tenant_id": instance.tenant_id(),
        "fallback": instance.is_fallback(),
    })
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data, meta: None }))
}

pub fn tenant_one<T: Serialize>(
    status: StatusCode,
    instance: &TenantInstance,
    data: T,
) -> (StatusCode, Json<SuccessOne<T>>) {
    (
        status,
        Json(SuccessOne {
            data,
            meta: Some(tenant_meta(instance)),
        }),
    )
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> (StatusCode, Json<SuccessMany<T>>) {
    let count = data.len() as u64;
    (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: MetaCount { count, tenant_id: None },
        }),
    )
}

pub fn tenant_many<T: Serialize>(instance: &TenantInstance, data: Vec<T>) -> (StatusCode, Json<SuccessMany<T>>) {
    let count = data.len() as u64;
    (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: MetaCount {
                count,
                tenant_id: Some(instance.tenant_id().to_string()),
            },
        }),
    )
}
