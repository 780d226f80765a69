//! services/api/src/web/mindmap.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::AuthUser;
use crate::web::rest::{ErrorBody, GenerateMindmapRequest, MindmapEnvelope};
use crate::web::sessions::parse_session_id;
use crate::web::state::AppState;

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/mindmap",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Mindmap in its current state", body = MindmapEnvelope),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No session or no mindmap yet", body = ErrorBody)
    )
)]
pub async fn get_mindmap_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<MindmapEnvelope>, ApiError> {
    let mindmap = state.mindmaps.get(user_id, parse_session_id(&id)?).await?;
    Ok(Json(mindmap.into()))
}

/// Queue (re)generation. The body is optional; `{"force": true}` replaces a
/// completed mindmap.
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/mindmap/generate",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body(content = GenerateMindmapRequest, description = "Optional", content_type = "application/json"),
    responses(
        (status = 202, description = "Generation queued or already in progress", body = MindmapEnvelope),
        (status = 400, description = "Session is still recording", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 403, description = "Session belongs to another user", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn generate_mindmap_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Option<Json<GenerateMindmapRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.unwrap_or_default();
    let mindmap = state
        .mindmaps
        .generate(user_id, parse_session_id(&id)?, request.force)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(MindmapEnvelope::from(mindmap))))
}
