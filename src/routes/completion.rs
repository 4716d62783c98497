use crate::handlers::completion::generate;
use crate::state::AppState;
use axum::{routing::post, Router};

pub fn completion_routes(state: AppState) -> Router {
    Router::new()
        .route("/completions", post(generate))
        .with_state(state)
}
