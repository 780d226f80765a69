//! services/api/src/web/rest.rs
//!
//! The response and payload structs of the REST API and the master definition for
//! the OpenAPI specification.

use chrono::{DateTime, Utc};
use mindhit_core::domain::{
    event_types, BatchEvent, Highlight, MindmapGraph, PageVisitWithUrl, RawEvent, Session,
    SessionDetails, DEFAULT_HIGHLIGHT_COLOR,
};
use mindhit_core::mindmap::{MindmapEdge, MindmapLayout, MindmapNode};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::{events, mindmap, sessions};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        sessions::start_session_handler,
        sessions::list_sessions_handler,
        sessions::get_session_handler,
        sessions::update_session_handler,
        sessions::pause_session_handler,
        sessions::resume_session_handler,
        sessions::stop_session_handler,
        sessions::delete_session_handler,
        events::batch_events_handler,
        events::list_events_handler,
        events::event_stats_handler,
        mindmap::get_mindmap_handler,
        mindmap::generate_mindmap_handler,
    ),
    components(schemas(
        SessionResponse,
        SessionEnvelope,
        SessionListResponse,
        SessionDetailResponse,
        SessionDetailEnvelope,
        UpdateSessionRequest,
        PageVisitResponse,
        HighlightResponse,
        EventBatchRequest,
        EventBatchResponse,
        EventListResponse,
        EventPageVisit,
        EventHighlight,
        EventStatsResponse,
        MindmapResponse,
        MindmapEnvelope,
        GenerateMindmapRequest,
        ErrorBody,
        ErrorDetail,
    )),
    tags(
        (name = "MindHit API", description = "Browsing session recording and mindmap generation.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Errors
//=========================================================================================

/// Shape of every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

//=========================================================================================
// Sessions
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    /// One of `recording`, `paused`, `processing`, `completed`, `failed`.
    pub session_status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            title: s.title,
            description: s.description,
            session_status: s.session_status.as_str().to_string(),
            started_at: s.started_at,
            ended_at: s.ended_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionEnvelope {
    pub session: SessionResponse,
}

impl From<Session> for SessionEnvelope {
    fn from(s: Session) -> Self {
        Self { session: s.into() }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PageVisitResponse {
    pub id: Uuid,
    pub url_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub max_scroll_depth: f64,
}

impl From<PageVisitWithUrl> for PageVisitResponse {
    fn from(pv: PageVisitWithUrl) -> Self {
        Self {
            id: pv.visit.id,
            url_id: pv.url.id,
            url: pv.url.url,
            title: pv.url.title,
            keywords: pv.url.keywords,
            summary: pv.url.summary,
            entered_at: pv.visit.entered_at,
            left_at: pv.visit.left_at,
            duration_ms: pv.visit.duration_ms,
            max_scroll_depth: pv.visit.max_scroll_depth,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HighlightResponse {
    pub id: Uuid,
    pub page_visit_id: Option<Uuid>,
    pub text: String,
    pub selector: Option<String>,
    pub color: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Highlight> for HighlightResponse {
    fn from(h: Highlight) -> Self {
        Self {
            id: h.id,
            page_visit_id: h.page_visit_id,
            text: h.text,
            selector: h.selector,
            color: h.color,
            note: h.note,
            created_at: h.created_at,
        }
    }
}

/// A session with everything recorded in it.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: SessionResponse,
    pub page_visits: Vec<PageVisitResponse>,
    pub highlights: Vec<HighlightResponse>,
    pub mindmap: Option<MindmapResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionDetailEnvelope {
    pub session: SessionDetailResponse,
}

impl From<SessionDetails> for SessionDetailEnvelope {
    fn from(d: SessionDetails) -> Self {
        Self {
            session: SessionDetailResponse {
                session: d.session.into(),
                page_visits: d.page_visits.into_iter().map(Into::into).collect(),
                highlights: d.highlights.into_iter().map(Into::into).collect(),
                mindmap: d.mindmap.map(Into::into),
            },
        }
    }
}

//=========================================================================================
// Events
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct EventBatchRequest {
    /// Events as sent by the extension: `{type, timestamp, url?, title?, content?, payload?}`.
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<BatchEvent>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventBatchResponse {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventListParams {
    /// Only events of this type.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventPageVisit {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub visited_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventHighlight {
    pub id: Uuid,
    pub text: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventListResponse {
    pub page_visits: Vec<EventPageVisit>,
    pub highlights: Vec<EventHighlight>,
    /// Matching events before pagination.
    pub total: i64,
}

impl EventListResponse {
    /// Splits stored raw events into the two typed lists the extension reads.
    pub fn from_raw(events: Vec<RawEvent>, total: i64) -> Self {
        let mut page_visits = Vec::new();
        let mut highlights = Vec::new();
        for raw in events {
            let parsed: Option<BatchEvent> = serde_json::from_str(&raw.payload).ok();
            match raw.event_type.as_str() {
                event_types::PAGE_VISIT => page_visits.push(EventPageVisit {
                    id: raw.id,
                    url: parsed.as_ref().and_then(|e| e.url.clone()).unwrap_or_default(),
                    title: parsed.as_ref().and_then(|e| e.title.clone()).filter(|t| !t.is_empty()),
                    visited_at: raw.timestamp,
                }),
                event_types::HIGHLIGHT => highlights.push(EventHighlight {
                    id: raw.id,
                    text: parsed
                        .as_ref()
                        .and_then(|e| e.payload_str("text"))
                        .unwrap_or_default()
                        .to_string(),
                    color: parsed
                        .as_ref()
                        .and_then(|e| e.payload_str("color"))
                        .filter(|c| !c.is_empty())
                        .unwrap_or(DEFAULT_HIGHLIGHT_COLOR)
                        .to_string(),
                    created_at: raw.created_at,
                }),
                _ => {}
            }
        }
        Self {
            page_visits,
            highlights,
            total,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventStatsResponse {
    pub total_events: i64,
    pub page_visits: i64,
    pub highlights: i64,
    pub unique_urls: i64,
}

//=========================================================================================
// Mindmaps
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct MindmapResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    /// One of `pending`, `running`, `completed`, `failed`.
    pub status: String,
    pub error_message: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub nodes: Vec<MindmapNode>,
    #[schema(value_type = Vec<Object>)]
    pub edges: Vec<MindmapEdge>,
    #[schema(value_type = Option<Object>)]
    pub layout: Option<MindmapLayout>,
    pub version: i32,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MindmapGraph> for MindmapResponse {
    fn from(m: MindmapGraph) -> Self {
        Self {
            id: m.id,
            session_id: m.session_id,
            status: m.status.as_str().to_string(),
            error_message: m.error_message,
            nodes: m.nodes,
            edges: m.edges,
            layout: m.layout,
            version: m.version,
            generated_at: m.generated_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MindmapEnvelope {
    pub mindmap: MindmapResponse,
}

impl From<MindmapGraph> for MindmapEnvelope {
    fn from(m: MindmapGraph) -> Self {
        Self { mindmap: m.into() }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct GenerateMindmapRequest {
    /// Regenerate even if a completed mindmap exists.
    #[serde(default)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(event_type: &str, payload: serde_json::Value) -> RawEvent {
        let now = Utc::now();
        RawEvent {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: now,
            payload: payload.to_string(),
            processed: true,
            processed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn raw_events_split_into_typed_lists() {
        let events = vec![
            raw(
                "page_visit",
                serde_json::json!({"type": "page_visit", "timestamp": 1, "url": "https://a.dev", "title": "A"}),
            ),
            raw(
                "highlight",
                serde_json::json!({"type": "highlight", "timestamp": 2, "payload": {"text": "hi"}}),
            ),
            raw("scroll", serde_json::json!({"type": "scroll", "timestamp": 3})),
        ];
        let list = EventListResponse::from_raw(events, 3);
        assert_eq!(list.total, 3);
        assert_eq!(list.page_visits[0].url, "https://a.dev");
        assert_eq!(list.page_visits[0].title.as_deref(), Some("A"));
        assert_eq!(list.highlights[0].text, "hi");
        assert_eq!(list.highlights[0].color, DEFAULT_HIGHLIGHT_COLOR);
    }

    #[test]
    fn openapi_document_lists_session_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/sessions/{id}/events/batch"));
        assert!(doc.paths.paths.contains_key("/v1/sessions/{id}/mindmap/generate"));
    }
}
