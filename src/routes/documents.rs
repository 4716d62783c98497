//! Document routes for the selected school: /documents/:collection and /documents/:collection/:id.

use crate::handlers::documents::{
    add_document, delete_document, get_document, list_documents, set_document, update_document,
};
use crate::state::AppState;
use axum::{routing::get, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted document body.
pub const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

pub fn document_routes(state: AppState) -> Router {
    Router::new()
        .route("/documents/:collection", get(list_documents).post(add_document))
        .route(
            "/documents/:collection/:id",
            get(get_document)
                .put(set_document)
                .patch(update_document)
                .delete(delete_document),
        )
        .layer(RequestBodyLimitLayer::new(MAX_DOCUMENT_BYTES))
        .with_state(state)
}
