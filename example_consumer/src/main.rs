//! Example consumer: a separate Rust project serving the SDK's routes.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Configure with `TENANT_BACKEND`, `TENANT_FALLBACK`, `TENANT_REGISTRY_PATH`, `GEMINI_API_KEY`, etc. (see `Settings`).

use sekolah_sdk::{api_router, AppState, Settings};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sekolah_sdk=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let state = AppState::from_settings(&settings)?;
    let connections = state.connections.clone();
    let ready = connections
        .tenants()
        .iter()
        .filter(|(id, _)| connections.is_configured(id))
        .count();
    tracing::info!(
        configured = ready,
        total = connections.tenants().len(),
        completion = state.completion.is_some(),
        "schools provisioned"
    );

    let app = api_router(state);
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
