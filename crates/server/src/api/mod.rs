pub mod config;
pub mod health;
pub mod schemas;
pub mod sends;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ephemera_lifecycle::SendManager;

use crate::config::LimitsConfig;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SendManager>,
    /// Upload limits, also served at `/api/config`.
    pub limits: LimitsConfig,
    /// Base URL for share links, without a trailing slash.
    pub base_url: String,
}

/// Build the Axum router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.limits.max_file_size_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health::health))
        .route("/api/config", get(config::limits))
        .route("/api/send", axum::routing::post(sends::create))
        .route("/api/send/{id}", get(sends::download))
        .route("/api/send/{id}/check", get(sends::check))
        .route("/api/text/{id}", get(sends::text))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
