use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, middleware as api_middleware, transfers};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Routes that act on behalf of a catalog user
    let caller_routes = Router::new()
        .route("/transfer", post(transfers::request_transfer))
        .route("/transfer/{job_id}", delete(transfers::delete_transfer))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_middleware::auth_middleware,
        ));

    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .merge(caller_routes)
        .with_state(state.clone());

    Router::new()
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(api_middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
