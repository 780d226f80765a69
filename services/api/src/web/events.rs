//! services/api/src/web/events.rs
//!
//! Event ingestion and read-back for a session.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::AuthUser;
use crate::web::rest::{
    ErrorBody, EventBatchRequest, EventBatchResponse, EventListParams, EventListResponse,
    EventStatsResponse,
};
use crate::web::sessions::parse_session_id;
use crate::web::state::AppState;

/// Store a batch of extension events against a recording or paused session.
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/events/batch",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = EventBatchRequest,
    responses(
        (status = 200, description = "Batch stored", body = EventBatchResponse),
        (status = 400, description = "Empty batch or session no longer recording", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn batch_events_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<EventBatchRequest>,
) -> Result<Json<EventBatchResponse>, ApiError> {
    let summary = state
        .events
        .ingest_batch(user_id, parse_session_id(&id)?, &body.events)
        .await?;
    Ok(Json(EventBatchResponse {
        processed: summary.processed,
        total: summary.total,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/events",
    params(("id" = Uuid, Path, description = "Session id"), EventListParams),
    responses(
        (status = 200, description = "Stored events", body = EventListResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn list_events_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(params): Query<EventListParams>,
) -> Result<Json<EventListResponse>, ApiError> {
    let (events, total) = state
        .events
        .list(
            user_id,
            parse_session_id(&id)?,
            params.event_type.as_deref(),
            params.limit,
            params.offset,
        )
        .await?;
    Ok(Json(EventListResponse::from_raw(events, total)))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/events/stats",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Event counts", body = EventStatsResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn event_stats_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<EventStatsResponse>, ApiError> {
    let stats = state.events.stats(user_id, parse_session_id(&id)?).await?;
    Ok(Json(EventStatsResponse {
        total_events: stats.total_events,
        page_visits: stats.page_visits,
        highlights: stats.highlights,
        unique_urls: stats.unique_urls,
    }))
}
