//! services/api/src/web/sessions.rs
//!
//! Session lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::AuthUser;
use crate::web::rest::{
    ErrorBody, PageParams, SessionDetailEnvelope, SessionEnvelope, SessionListResponse,
    UpdateSessionRequest,
};
use crate::web::state::AppState;

/// Path ids that are not UUIDs cannot name an existing session.
pub(crate) fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("session".to_string()))
}

/// Start a new recording session.
#[utoipa::path(
    post,
    path = "/v1/sessions/start",
    responses(
        (status = 201, description = "Session started", body = SessionEnvelope),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody)
    )
)]
pub async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.start(user_id).await?;
    Ok((StatusCode::CREATED, Json(SessionEnvelope::from(session))))
}

/// List the caller's sessions, newest first.
#[utoipa::path(
    get,
    path = "/v1/sessions",
    params(PageParams),
    responses(
        (status = 200, description = "Sessions", body = SessionListResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody)
    )
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(page): Query<PageParams>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.sessions.list(user_id, page.limit, page.offset).await?;
    Ok(Json(SessionListResponse {
        sessions: sessions.into_iter().map(Into::into).collect(),
    }))
}

/// Read a session with its page visits, highlights and mindmap.
#[utoipa::path(
    get,
    path = "/v1/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session", body = SessionDetailEnvelope),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetailEnvelope>, ApiError> {
    let details = state
        .sessions
        .get_with_details(user_id, parse_session_id(&id)?)
        .await?;
    Ok(Json(details.into()))
}

/// Set a session's title and description.
#[utoipa::path(
    put,
    path = "/v1/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = UpdateSessionRequest,
    responses(
        (status = 200, description = "Updated session", body = SessionEnvelope),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn update_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let session = state
        .sessions
        .update_metadata(
            user_id,
            parse_session_id(&id)?,
            body.title.as_deref(),
            body.description.as_deref(),
        )
        .await?;
    Ok(Json(session.into()))
}

/// Pause a recording session.
#[utoipa::path(
    patch,
    path = "/v1/sessions/{id}/pause",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Paused session", body = SessionEnvelope),
        (status = 400, description = "Session is not recording", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn pause_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let session = state.sessions.pause(user_id, parse_session_id(&id)?).await?;
    Ok(Json(session.into()))
}

/// Resume a paused session.
#[utoipa::path(
    patch,
    path = "/v1/sessions/{id}/resume",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Recording session", body = SessionEnvelope),
        (status = 400, description = "Session is not paused", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn resume_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let session = state.sessions.resume(user_id, parse_session_id(&id)?).await?;
    Ok(Json(session.into()))
}

/// Stop recording and queue mindmap generation. Stopping twice is harmless.
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/stop",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session now processing (or already ended)", body = SessionEnvelope),
        (status = 400, description = "Session cannot be stopped", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn stop_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let session = state.sessions.stop(user_id, parse_session_id(&id)?).await?;
    Ok(Json(session.into()))
}

/// Soft-delete a session.
#[utoipa::path(
    delete,
    path = "/v1/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sessions.delete(user_id, parse_session_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
