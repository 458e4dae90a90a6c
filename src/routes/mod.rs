use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{middleware, state::AppState};

mod auth;
mod extract;
mod images;
mod products;


pub fn router(state: Arc<AppState>, upload_limit: usize) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(products::router())
        .merge(images::router(upload_limit))
        .layer(from_fn_with_state(state.clone(), middleware::auth::resolve_identity))
        .merge(auth::public_router(state.clone()))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
