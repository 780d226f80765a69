//! crates/mindhit_core/src/domain.rs
//!
//! Defines the core data structures for recorded browsing sessions, the URLs they
//! touch, and the mindmaps generated from them. These structs carry no storage
//! concerns; adapters convert their own row types into them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::mindmap::{MindmapEdge, MindmapLayout, MindmapNode};

/// Highlight colour applied when the extension does not send one.
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#FFFF00";

//=========================================================================================
// Status Enums
//=========================================================================================

/// Lifecycle status of a recording session. See `lifecycle` for legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Recording,
    Paused,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Recording,
        SessionStatus::Paused,
        SessionStatus::Processing,
        SessionStatus::Completed,
        SessionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Recording => "recording",
            SessionStatus::Paused => "paused",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// `ended_at` is set exactly when the session is in one of these states.
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            SessionStatus::Processing | SessionStatus::Completed | SessionStatus::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// A paused session still takes events the client buffered before pausing.
    pub fn accepts_events(&self) -> bool {
        matches!(self, SessionStatus::Recording | SessionStatus::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown session status '{}'", s))
    }
}

/// Soft-delete marker shared by users and sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            other => Err(format!("unknown record status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MindmapStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl MindmapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MindmapStatus::Pending => "pending",
            MindmapStatus::Running => "running",
            MindmapStatus::Completed => "completed",
            MindmapStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MindmapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MindmapStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MindmapStatus::Pending),
            "running" => Ok(MindmapStatus::Running),
            "completed" => Ok(MindmapStatus::Completed),
            "failed" => Ok(MindmapStatus::Failed),
            other => Err(format!("unknown mindmap status '{}'", other)),
        }
    }
}

//=========================================================================================
// Sessions and Events
//=========================================================================================

/// One continuous recording of a user's browsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub session_status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub record_status: RecordStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_deleted(&self) -> bool {
        self.record_status == RecordStatus::Inactive
    }
}

/// Event type tags the ingestor projects into typed rows.
pub mod event_types {
    pub const PAGE_VISIT: &str = "page_visit";
    pub const HIGHLIGHT: &str = "highlight";
}

/// The verbatim record of one event as received.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRawEvent {
    pub session_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: String,
}

/// A single event as sent by the browser extension in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
}

impl BatchEvent {
    /// Reads a string field out of the free-form payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }
}

/// One visit to one URL within a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PageVisit {
    pub id: Uuid,
    pub session_id: Uuid,
    pub url_id: Uuid,
    pub entered_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub max_scroll_depth: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A page visit joined with the URL it points to.
#[derive(Debug, Clone, PartialEq)]
pub struct PageVisitWithUrl {
    pub visit: PageVisit,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub id: Uuid,
    pub session_id: Uuid,
    pub page_visit_id: Option<Uuid>,
    pub text: String,
    pub selector: Option<String>,
    pub color: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHighlight {
    pub session_id: Uuid,
    pub page_visit_id: Option<Uuid>,
    pub text: String,
    pub selector: Option<String>,
    pub color: String,
}

/// Per-session aggregate counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total_events: i64,
    pub page_visits: i64,
    pub highlights: i64,
    pub unique_urls: i64,
}

//=========================================================================================
// URLs
//=========================================================================================

/// A canonical web address, shared across all users.
#[derive(Debug, Clone, PartialEq)]
pub struct Url {
    pub id: Uuid,
    pub url: String,
    pub url_hash: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub crawled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Url {
    pub fn has_content(&self) -> bool {
        self.content.as_deref().map_or(false, |c| !c.is_empty())
    }

    pub fn has_keywords(&self) -> bool {
        !self.keywords.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NewUrl {
    pub url: String,
    pub url_hash: String,
    pub title: Option<String>,
    pub content: Option<String>,
}

//=========================================================================================
// Mindmaps
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MindmapGraph {
    pub id: Uuid,
    pub session_id: Uuid,
    pub status: MindmapStatus,
    pub error_message: Option<String>,
    pub nodes: Vec<MindmapNode>,
    pub edges: Vec<MindmapEdge>,
    pub layout: Option<MindmapLayout>,
    pub generated_at: DateTime<Utc>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A session read together with everything projected from it.
#[derive(Debug, Clone)]
pub struct SessionDetails {
    pub session: Session,
    pub page_visits: Vec<PageVisitWithUrl>,
    pub highlights: Vec<Highlight>,
    pub mindmap: Option<MindmapGraph>,
}

/// Result of trying to store a finished mindmap.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(MindmapGraph),
    /// The session left `processing` (deleted, swept, or committed by another run).
    SessionNotProcessing,
}

//=========================================================================================
// Users, Plans and Usage
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub record_status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOperation {
    Summarize,
    Mindmap,
    Keywords,
}

impl UsageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOperation::Summarize => "summarize",
            UsageOperation::Mindmap => "mindmap",
            UsageOperation::Keywords => "keywords",
        }
    }
}

impl FromStr for UsageOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summarize" => Ok(UsageOperation::Summarize),
            "mindmap" => Ok(UsageOperation::Mindmap),
            "keywords" => Ok(UsageOperation::Keywords),
            other => Err(format!("unknown usage operation '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTokenUsage {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub operation: UsageOperation,
    pub tokens_used: i64,
    pub ai_model: Option<String>,
    pub period_start: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenUsage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub operation: UsageOperation,
    pub tokens_used: i64,
    pub ai_model: Option<String>,
    pub period_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
