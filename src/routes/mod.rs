pub mod auth;
pub mod common;
pub mod completion;
pub mod documents;
pub mod tenants;

pub use auth::auth_routes;
pub use common::{common_routes, common_routes_with_ready};
pub use completion::completion_routes;
pub use documents::document_routes;
pub use tenants::tenant_routes;

use crate::state::AppState;
use axum::Router;

/// Everything under `/api/v1` plus the common routes at the root.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest(
            "/api/v1",
            tenant_routes(state.clone())
                .merge(document_routes(state.clone()))
                .merge(auth_routes(state.clone()))
                .merge(completion_routes(state)),
        )
}
