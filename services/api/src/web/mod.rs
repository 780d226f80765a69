//! services/api/src/web/mod.rs
//!
//! The HTTP surface: handlers, DTOs, auth middleware and the router that ties
//! them together.

pub mod events;
pub mod middleware;
pub mod mindmap;
pub mod rest;
pub mod sessions;
pub mod state;

pub use middleware::require_auth;
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use self::rest::ApiDoc;

/// Upper bound on request bodies; event batches are the largest payloads.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Builds the full application router.
pub fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/v1/sessions/start", post(sessions::start_session_handler))
        .route("/v1/sessions", get(sessions::list_sessions_handler))
        .route(
            "/v1/sessions/{id}",
            get(sessions::get_session_handler)
                .put(sessions::update_session_handler)
                .delete(sessions::delete_session_handler),
        )
        .route("/v1/sessions/{id}/pause", patch(sessions::pause_session_handler))
        .route("/v1/sessions/{id}/resume", patch(sessions::resume_session_handler))
        .route("/v1/sessions/{id}/stop", post(sessions::stop_session_handler))
        .route("/v1/sessions/{id}/events/batch", post(events::batch_events_handler))
        .route("/v1/sessions/{id}/events", get(events::list_events_handler))
        .route("/v1/sessions/{id}/events/stats", get(events::event_stats_handler))
        .route("/v1/sessions/{id}/mindmap", get(mindmap::get_mindmap_handler))
        .route(
            "/v1/sessions/{id}/mindmap/generate",
            post(mindmap::generate_mindmap_handler),
        )
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    // Public routes (no auth required)
    let public_routes = Router::new().route("/healthz", get(healthz));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
