//! Extract the selected school from the request: `X-Tenant-ID` header, else the
//! `selected_school` cookie written by the school picker.

use crate::selection::SELECTED_TENANT_KEY;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

/// Header name for tenant id. Default: `X-Tenant-ID`.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// Selected tenant id, `None` when the client has not picked a school.
#[derive(Clone, Debug)]
pub struct SelectedTenant(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for SelectedTenant
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| cookie_value(&parts.headers, SELECTED_TENANT_KEY));
        Ok(SelectedTenant(value))
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| url::form_urlencoded::parse(pair.trim().as_bytes()).next())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value persisting the selected school in the client.
pub fn selection_cookie(tenant_id: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(tenant_id.as_bytes()).collect();
    format!(
        "{}={}; Path=/; Max-Age=31536000; SameSite=Lax; HttpOnly",
        SELECTED_TENANT_KEY, encoded
    )
}
