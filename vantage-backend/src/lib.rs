pub mod analysis;
pub mod commands;
pub mod config;
pub mod error;
pub mod helpers;
pub mod ingest;
pub mod inspect;
pub mod pipeline;
mod routes;
pub mod scheduler;
pub mod snapshot;
pub mod validation;

#[cfg(test)]
mod test_support;

use axum::{
    Router,
    http::StatusCode,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::pipeline::Pipeline;

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// SHA-256 of the configured API key, `None` leaves routes open
    pub api_key_hash: Option<String>,
}

/// Create the application router serving the given pipeline
pub fn create_app(pipeline: Arc<Pipeline>, config: &Config) -> Router {
    let state = Arc::new(AppState {
        pipeline,
        api_key_hash: config.api_key.as_deref().map(helpers::hash_api_key),
    });

    // Routes fed by the game server
    let event_routes = Router::new().route("/events", post(routes::post_events));

    // Read-only views
    let read_routes = Router::new()
        .route("/analysis", get(routes::get_analysis))
        .route("/players/{id}", get(routes::get_player));

    // Operator routes
    let admin_routes = Router::new()
        .route("/admin/refresh", post(routes::admin_refresh))
        .route("/admin/flush", post(routes::admin_flush))
        .route("/admin/status", get(routes::admin_status))
        .route("/players/{id}/report", delete(routes::invalidate_report));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(event_routes)
        .merge(read_routes)
        .merge(admin_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(config.request_body_limit))
        .with_state(state)
}
