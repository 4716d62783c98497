use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use sekolah_sdk::{
    api_router, common_routes, AppState, CompletionError, CompletionRequest, CompletionService, ConnectionRegistry,
    FallbackPolicy, MemoryBackend, MemoryStorage, Settings, TenantCredentials, TenantRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const DEFAULT: &str = "SD NEGERI 1 BILATO";

fn app(fallback: FallbackPolicy) -> (Router, Arc<ConnectionRegistry>, Arc<MemoryBackend>) {
    let tenants = TenantRegistry::from_entries([
        (DEFAULT, TenantCredentials::new("AIzaDEFAULT", "sdn1-bilato")),
        ("SCHOOL_A", TenantCredentials::new("AIzaVALID123", "school-a")),
        ("SCHOOL_B", TenantCredentials::new("PASTE_HERE", "school-b")),
    ])
    .unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let connections = Arc::new(
        ConnectionRegistry::new(Arc::new(tenants), backend.clone(), Arc::new(MemoryStorage::new()), DEFAULT)
            .with_fallback(fallback),
    );
    (api_router(AppState::new(connections.clone())), connections, backend)
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn send(app: &Router, req: Request<Body>) -> Reply {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply { status, headers, body }
}

fn get(uri: &str, tenant: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(t) = tenant {
        b = b.header("X-Tenant-ID", t);
    }
    b.body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, tenant: Option<&str>, body: Value) -> Request<Body> {
    let mut b = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = tenant {
        b = b.header("X-Tenant-ID", t);
    }
    b.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_and_version() {
    let app = common_routes();
    let r = send(&app, get("/health", None)).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["status"], "ok");
    let r = send(&app, get("/version", None)).await;
    assert_eq!(r.body["name"], "sekolah-sdk");
}

#[tokio::test]
async fn ready_builds_default_instance() {
    let (app, connections, _) = app(FallbackPolicy::Strict);
    let r = send(&app, get("/ready", None)).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["default_tenant"], DEFAULT);
    assert_eq!(connections.instance_keys(), vec!["SD_NEGERI_1_BILATO".to_string()]);
}

#[tokio::test]
async fn tenant_directory_hides_api_keys() {
    let (app, _, _) = app(FallbackPolicy::Strict);
    let r = send(&app, get("/api/v1/tenants", None)).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["meta"]["count"], 3);
    let raw = r.body.to_string();
    assert!(!raw.contains("AIzaVALID123"));
    assert!(!raw.contains("PASTE_HERE"));

    let entries = r.body["data"].as_array().unwrap();
    let b = entries.iter().find(|e| e["tenant_id"] == "SCHOOL_B").unwrap();
    assert_eq!(b["configured"], false);
    assert_eq!(b["connected"], false);

    let r = send(&app, get("/api/v1/tenants/SCHOOL_A/status", None)).await;
    assert_eq!(r.body["data"]["configured"], true);
    let r = send(&app, get("/api/v1/tenants/SCHOOL_C/status", None)).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.body["error"]["code"], "unknown_tenant");
}

#[tokio::test]
async fn selection_checks_provisioning_and_sets_cookie() {
    let (app, _, backend) = app(FallbackPolicy::Lenient);

    let r = send(&app, with_json("POST", "/api/v1/tenants/select", None, json!({ "tenant_id": "SCHOOL_C" }))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);

    let r = send(&app, with_json("POST", "/api/v1/tenants/select", None, json!({ "tenant_id": "SCHOOL_B" }))).await;
    assert_eq!(r.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(r.body["error"]["code"], "tenant_not_configured");

    let r = send(&app, with_json("POST", "/api/v1/tenants/select", None, json!({ "tenant_id": DEFAULT }))).await;
    assert_eq!(r.status, StatusCode::OK);
    let cookie = r.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(cookie.starts_with("selected_school=SD+NEGERI+1+BILATO;"));
    assert!(backend.initialized().is_empty());

    let pair = cookie.split(';').next().unwrap().to_string();
    let req = Request::builder()
        .uri("/api/v1/tenants/current")
        .header(header::COOKIE, pair)
        .body(Body::empty())
        .unwrap();
    let r = send(&app, req).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["data"]["tenant_id"], DEFAULT);
    assert_eq!(r.body["data"]["instance_key"], "SD_NEGERI_1_BILATO");
}

#[tokio::test]
async fn documents_are_isolated_per_school() {
    let (app, _, backend) = app(FallbackPolicy::Strict);

    let r = send(
        &app,
        with_json("POST", "/api/v1/documents/rpm", Some("SCHOOL_A"), json!({ "mapel": "IPAS", "kelas": "IV" })),
    )
    .await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(r.body["meta"]["tenant_id"], "SCHOOL_A");
    let id = r.body["data"]["id"].as_str().unwrap().to_string();

    let r = send(&app, get(&format!("/api/v1/documents/rpm/{id}"), Some("SCHOOL_A"))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["data"]["data"]["mapel"], "IPAS");

    let r = send(&app, get(&format!("/api/v1/documents/rpm/{id}"), None)).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.body["error"]["code"], "not_found");

    let r = send(&app, get("/api/v1/documents/rpm?field=kelas&value=IV", Some("SCHOOL_A"))).await;
    assert_eq!(r.body["meta"]["count"], 1);
    let r = send(&app, get("/api/v1/documents/rpm?field=kelas&value=V", Some("SCHOOL_A"))).await;
    assert_eq!(r.body["meta"]["count"], 0);
    let r = send(&app, get("/api/v1/documents/rpm?field=kelas", Some("SCHOOL_A"))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let mut initialized = backend.initialized();
    initialized.sort();
    assert_eq!(initialized, vec!["SCHOOL_A".to_string(), "SD_NEGERI_1_BILATO".to_string()]);
}

#[tokio::test]
async fn put_patch_delete() {
    let (app, _, _) = app(FallbackPolicy::Strict);
    let uri = "/api/v1/documents/profil/guru-1";

    let r = send(&app, with_json("PATCH", uri, None, json!({ "nama": "Bu Sari" }))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);

    let r = send(&app, with_json("PUT", uri, None, json!({ "nama": "Bu Sari", "kelas": "IV" }))).await;
    assert_eq!(r.status, StatusCode::OK);
    let r = send(&app, with_json("PUT", &format!("{uri}?merge=true"), None, json!({ "kelas": "V" }))).await;
    assert_eq!(r.body["data"]["data"], json!({ "nama": "Bu Sari", "kelas": "V" }));
    let r = send(&app, with_json("PATCH", uri, None, json!({ "nip": "1987" }))).await;
    assert_eq!(r.body["data"]["data"]["nip"], "1987");

    let r = send(&app, with_json("PUT", uri, None, json!(["not", "an", "object"]))).await;
    assert_eq!(r.status, StatusCode::UNPROCESSABLE_ENTITY);

    let req = Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap();
    let r = send(&app, req).await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&app, get(uri, None)).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_and_unprovisioned_tenants_fail_closed() {
    let (app, connections, _) = app(FallbackPolicy::Strict);
    let r = send(&app, get("/api/v1/documents/rpm", Some("SCHOOL_C"))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.body["error"]["code"], "unknown_tenant");

    let r = send(&app, get("/api/v1/documents/rpm", Some("SCHOOL_B"))).await;
    assert_eq!(r.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(r.body["error"]["code"], "tenant_not_configured");
    assert!(connections.instance_keys().is_empty());
}

#[tokio::test]
async fn lenient_fallback_serves_data_but_blocks_sign_in() {
    let (app, _, _) = app(FallbackPolicy::Lenient);
    let r = send(&app, get("/api/v1/tenants/current", Some("SCHOOL_B"))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["data"]["credentials_tenant"], DEFAULT);
    assert_eq!(r.body["data"]["fallback"], true);
    assert_eq!(r.body["meta"]["fallback"], true);

    let r = send(
        &app,
        with_json("POST", "/api/v1/auth/sign-in", Some("SCHOOL_B"), json!({ "email": "a@b.id", "password": "x" })),
    )
    .await;
    assert_eq!(r.status, StatusCode::SERVICE_UNAVAILABLE);
}

fn bearer(method: &str, uri: &str, tenant: &str, token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method(method).uri(uri).header("X-Tenant-ID", tenant);
    if let Some(t) = token {
        b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    b.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn auth_flow_per_school() {
    let (app, _, _) = app(FallbackPolicy::Strict);
    let creds = json!({ "email": "guru@sekolah.id", "password": "rahasia" });

    let r = send(&app, with_json("POST", "/api/v1/auth/sign-up", Some("SCHOOL_A"), creds.clone())).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let uid = r.body["data"]["uid"].as_str().unwrap().to_string();
    let token = r.body["data"]["token"].as_str().unwrap().to_string();

    let r = send(&app, bearer("GET", "/api/v1/auth/me", "SCHOOL_A", Some(&token))).await;
    assert_eq!(r.body["data"]["uid"], uid.as_str());
    let r = send(&app, bearer("GET", "/api/v1/auth/me", DEFAULT, Some(&token))).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);

    let r = send(&app, with_json("POST", "/api/v1/auth/sign-up", Some("SCHOOL_A"), creds.clone())).await;
    assert_eq!(r.status, StatusCode::CONFLICT);

    let r = send(&app, bearer("POST", "/api/v1/auth/sign-out", "SCHOOL_A", Some(&token))).await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&app, bearer("GET", "/api/v1/auth/me", "SCHOOL_A", Some(&token))).await;
    assert_eq!(r.body["error"]["code"], "not_signed_in");

    let wrong = json!({ "email": "guru@sekolah.id", "password": "salah" });
    let r = send(&app, with_json("POST", "/api/v1/auth/sign-in", Some("SCHOOL_A"), wrong)).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    let r = send(&app, with_json("POST", "/api/v1/auth/sign-in", Some("SCHOOL_A"), creds)).await;
    assert_eq!(r.status, StatusCode::OK);
}

#[tokio::test]
async fn sessions_are_private_to_their_token() {
    let (app, _, _) = app(FallbackPolicy::Strict);
    let creds = json!({ "email": "kepsek@sekolah.id", "password": "rahasia" });
    let r = send(&app, with_json("POST", "/api/v1/auth/sign-up", Some("SCHOOL_A"), creds)).await;
    let token = r.body["data"]["token"].as_str().unwrap().to_string();

    // Another caller of the same school, with no credential or a made-up one.
    let r = send(&app, bearer("GET", "/api/v1/auth/me", "SCHOOL_A", None)).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    assert!(!r.body.to_string().contains("kepsek"));
    let r = send(&app, bearer("GET", "/api/v1/auth/me", "SCHOOL_A", Some("guessed"))).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    let r = send(&app, bearer("POST", "/api/v1/auth/sign-out", "SCHOOL_A", None)).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    let r = send(&app, bearer("POST", "/api/v1/auth/sign-out", "SCHOOL_A", Some("guessed"))).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);

    let r = send(&app, bearer("GET", "/api/v1/auth/me", "SCHOOL_A", Some(&token))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["data"]["email"], "kepsek@sekolah.id");
}

#[tokio::test]
async fn selection_store_routes_requests_without_a_choice() {
    let (app, connections, _) = app(FallbackPolicy::Strict);
    assert_eq!(connections.resolve_current().unwrap().tenant_id(), DEFAULT);

    let r = send(&app, with_json("POST", "/api/v1/tenants/select", None, json!({ "tenant_id": "SCHOOL_A" }))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(connections.resolve_current().unwrap().tenant_id(), "SCHOOL_A");

    let r = send(&app, with_json("POST", "/api/v1/documents/rpm", None, json!({ "mapel": "IPAS" }))).await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(r.body["meta"]["tenant_id"], "SCHOOL_A");

    let r = send(&app, get("/api/v1/documents/rpm", Some(DEFAULT))).await;
    assert_eq!(r.body["meta"]["count"], 0);
    let r = send(&app, get("/api/v1/tenants/current", None)).await;
    assert_eq!(r.body["data"]["tenant_id"], "SCHOOL_A");

    let r = send(&app, with_json("POST", "/api/v1/tenants/select", None, json!({ "tenant_id": "SCHOOL_B" }))).await;
    assert_eq!(r.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(connections.resolve_current().unwrap().tenant_id(), "SCHOOL_A");
}

#[tokio::test]
async fn key_alias_header_does_not_reach_another_school() {
    let (app, _, _) = app(FallbackPolicy::Lenient);
    let r = send(&app, with_json("POST", "/api/v1/documents/rpm", Some("SCHOOL_A"), json!({ "mapel": "IPAS" }))).await;
    assert_eq!(r.status, StatusCode::CREATED);

    let r = send(&app, get("/api/v1/documents/rpm", Some("SCHOOL A"))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.body["error"]["code"], "unknown_tenant");
}

struct Canned(&'static str);

#[async_trait]
impl CompletionService for Canned {
    async fn generate(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        match self.0 {
            "quota" => Err(CompletionError::RateLimited("quota exhausted".into())),
            reply => {
                assert!(request.prompt.contains("RPM"));
                Ok(reply.to_string())
            }
        }
    }
}

fn with_completion(service: Canned) -> Router {
    let (_, connections, _) = app(FallbackPolicy::Strict);
    api_router(AppState::new(connections).with_completion(Arc::new(service)))
}

#[tokio::test]
async fn completions_use_the_configured_service() {
    let (app, _, _) = app(FallbackPolicy::Strict);
    let body = json!({ "prompt": "Buat RPM IPAS" });
    let r = send(&app, with_json("POST", "/api/v1/completions", None, body.clone())).await;
    assert_eq!(r.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(r.body["error"]["code"], "completion_unavailable");

    let app = with_completion(Canned("```json\n{\"mapel\": \"IPAS\"}\n```"));
    let r = send(&app, with_json("POST", "/api/v1/completions", None, json!({ "prompt": "Buat RPM IPAS", "json": true }))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["data"]["json"]["mapel"], "IPAS");
    let r = send(&app, with_json("POST", "/api/v1/completions", None, json!({ "prompt": "  " }))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let app = with_completion(Canned("quota"));
    let r = send(&app, with_json("POST", "/api/v1/completions", None, body)).await;
    assert_eq!(r.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(r.body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn file_backed_selection_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        selection_path: Some(dir.path().join("selection.json")),
        ..Settings::default()
    };

    let state = AppState::from_settings(&settings).unwrap();
    let app = api_router(state);
    let r = send(
        &app,
        with_json("POST", "/api/v1/tenants/select", None, json!({ "tenant_id": "SD NEGERI 6 BILATO" })),
    )
    .await;
    assert_eq!(r.status, StatusCode::OK);

    let restarted = AppState::from_settings(&settings).unwrap();
    let instance = restarted.connections.resolve_current().unwrap();
    assert_eq!(instance.tenant_id(), "SD NEGERI 6 BILATO");
    assert_eq!(instance.instance_key(), "SD_NEGERI_6_BILATO");
}
