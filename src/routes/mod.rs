//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - JSON API under `/api/v1/...`
/// - CORS (allow any origin/method/headers), adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/builds", post(http::http_post_build))
        .route("/api/v1/users", post(http::http_post_user))
        .route("/api/v1/users/:user/projects/:project", get(http::http_get_project))
        .route("/api/v1/users/:user/projects/:project/xml", get(http::http_get_project_xml))
        .route("/api/v1/challenges/reject", post(http::http_post_reject))
        .route("/api/v1/challenges/restore", post(http::http_post_restore))
        .route("/api/v1/challenges/store", post(http::http_post_store))
        .route("/api/v1/challenges/undo_store", post(http::http_post_undo_store))
        .route("/api/v1/challenges/send", post(http::http_post_send))
        .route("/api/v1/quests/reject", post(http::http_post_quest_reject))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
