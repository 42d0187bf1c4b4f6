use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::metrics;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/functions",
            post(handlers::create_function).get(handlers::list_functions),
        )
        .route(
            "/functions/:id",
            get(handlers::get_function)
                .put(handlers::update_function)
                .delete(handlers::delete_function),
        )
        .route("/functions/:id/execute", post(handlers::execute_function))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn(metrics::track_requests))
        .with_state(state)
}
