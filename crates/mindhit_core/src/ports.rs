//! crates/mindhit_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of Postgres, the job queue backend, and the AI vendors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ai::{
    AiConfig, AiConfigInput, AiError, AiLog, ChatRequest, ChatResponse, NewAiLog, ProviderType,
    StreamHandler,
};
use crate::domain::{
    CommitOutcome, EventStats, Highlight, MindmapGraph, NewHighlight, NewRawEvent, NewTokenUsage,
    NewUrl, PageVisit, RawEvent, Session, SessionDetails, SessionStatus, TokenUsage, Url,
};
use crate::jobs::{EnqueueOutcome, Job, NewJob};
use crate::mindmap::MindmapData;
use crate::usage::BillingAccount;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all storage and queue port operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Ports
//=========================================================================================

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, user_id: Uuid) -> PortResult<Session>;

    /// Active session owned by an active user, or `None`.
    async fn find_session(&self, session_id: Uuid) -> PortResult<Option<Session>>;

    /// Newest first.
    async fn list_sessions_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<Session>>;

    async fn update_session_metadata(
        &self,
        session_id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
    ) -> PortResult<Session>;

    /// Moves the session to `to` only if its current status is one of `from`.
    /// Returns `None` when the condition did not hold. When `outbox` is given the
    /// job is inserted in the same transaction as the status change.
    ///
    /// `ended_at` is set (if still empty) whenever `to` is an ended state, and
    /// cleared otherwise.
    async fn transition_session(
        &self,
        session_id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        outbox: Option<NewJob>,
    ) -> PortResult<Option<Session>>;

    /// Soft delete. Returns false if the session was already gone.
    async fn soft_delete_session(&self, session_id: Uuid) -> PortResult<bool>;

    /// Consistent snapshot of the session and everything projected from it.
    async fn load_session_details(&self, session_id: Uuid) -> PortResult<Option<SessionDetails>>;

    /// Fails every live `recording`/`paused` session whose last update precedes
    /// `updated_before`. Returns how many were changed.
    async fn fail_stale_sessions(&self, updated_before: DateTime<Utc>) -> PortResult<u64>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn insert_raw_event(&self, event: NewRawEvent) -> PortResult<RawEvent>;

    async fn mark_raw_event_processed(&self, event_id: Uuid) -> PortResult<()>;

    async fn insert_page_visit(
        &self,
        session_id: Uuid,
        url_id: Uuid,
        entered_at: DateTime<Utc>,
    ) -> PortResult<PageVisit>;

    async fn insert_highlight(&self, highlight: NewHighlight) -> PortResult<Highlight>;

    /// Raw events ordered by timestamp descending, plus the unpaginated total.
    async fn list_raw_events(
        &self,
        session_id: Uuid,
        event_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> PortResult<(Vec<RawEvent>, i64)>;

    async fn event_stats(&self, session_id: Uuid) -> PortResult<EventStats>;
}

#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn find_url(&self, url_id: Uuid) -> PortResult<Option<Url>>;

    async fn find_url_by_hash(&self, url_hash: &str) -> PortResult<Option<Url>>;

    /// Inserts unless a row with the same hash exists; returns the stored row
    /// either way and whether this call created it.
    async fn insert_url_if_absent(&self, url: NewUrl) -> PortResult<(Url, bool)>;

    /// Stores `content` only if the row has none yet.
    async fn fill_url_content(&self, url_id: Uuid, content: &str) -> PortResult<Url>;

    async fn update_url_summary(
        &self,
        url_id: Uuid,
        summary: &str,
        keywords: &[String],
    ) -> PortResult<Url>;

    /// URLs with content but no summary, oldest first.
    async fn list_urls_without_summary(&self, limit: i64) -> PortResult<Vec<Url>>;
}

#[async_trait]
pub trait MindmapRepository: Send + Sync {
    async fn find_mindmap(&self, session_id: Uuid) -> PortResult<Option<MindmapGraph>>;

    /// Returns the session's mindmap, creating a `pending` row if none exists.
    async fn ensure_mindmap(&self, session_id: Uuid) -> PortResult<MindmapGraph>;

    async fn mark_mindmap_running(&self, session_id: Uuid) -> PortResult<()>;

    /// Atomically moves a `completed`/`failed` session back to `processing`,
    /// resets its mindmap to `pending`, and writes `outbox`.
    async fn begin_regeneration(
        &self,
        session_id: Uuid,
        outbox: NewJob,
    ) -> PortResult<Option<(Session, MindmapGraph)>>;

    /// In one transaction: records `usage`, stores the graph as `completed`, and
    /// moves the session from `processing` to `completed`.
    async fn commit_mindmap(
        &self,
        session_id: Uuid,
        data: &MindmapData,
        usage: Option<NewTokenUsage>,
    ) -> PortResult<CommitOutcome>;

    /// In one transaction: marks the mindmap failed with `error` and moves the
    /// session from `processing` to `failed`. Returns false if the session was
    /// not processing.
    async fn fail_mindmap(&self, session_id: Uuid, error: &str) -> PortResult<bool>;
}

#[async_trait]
pub trait AiRepository: Send + Sync {
    /// The enabled config for exactly this task type.
    async fn find_enabled_ai_config(&self, task_type: &str) -> PortResult<Option<AiConfig>>;

    async fn list_ai_configs(&self) -> PortResult<Vec<AiConfig>>;

    async fn upsert_ai_config(&self, input: AiConfigInput) -> PortResult<AiConfig>;

    async fn delete_ai_config(&self, task_type: &str) -> PortResult<bool>;

    async fn insert_ai_log(&self, log: NewAiLog) -> PortResult<AiLog>;

    async fn list_ai_logs_for_session(&self, session_id: Uuid) -> PortResult<Vec<AiLog>>;
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// `None` if the user does not exist.
    async fn billing_account(&self, user_id: Uuid) -> PortResult<Option<BillingAccount>>;

    async fn insert_token_usage(&self, usage: NewTokenUsage) -> PortResult<TokenUsage>;

    async fn sum_tokens_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<i64>;
}

#[async_trait]
pub trait AuthRepository: Send + Sync {
    /// Resolves an access token issued by the auth service to its active user.
    async fn validate_auth_session(&self, token: &str) -> PortResult<Uuid>;
}

/// Everything the application needs from its primary store.
pub trait DatabaseService:
    SessionRepository
    + EventRepository
    + UrlRepository
    + MindmapRepository
    + AiRepository
    + UsageRepository
    + AuthRepository
{
}

impl<T> DatabaseService for T where
    T: SessionRepository
        + EventRepository
        + UrlRepository
        + MindmapRepository
        + AiRepository
        + UsageRepository
        + AuthRepository
{
}

//=========================================================================================
// Job Queue Port
//=========================================================================================

/// Durable storage behind the job bus.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> PortResult<EnqueueOutcome>;

    /// Claims the next due pending job on `queue`. The claim is leased for the
    /// job's timeout plus `LEASE_GRACE_SECS`.
    async fn dequeue(&self, queue: &str) -> PortResult<Option<Job>>;

    async fn complete_job(&self, job_id: Uuid) -> PortResult<()>;

    /// Returns the job to pending with `retried + 1`, due at `run_at`.
    async fn retry_job(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> PortResult<()>;

    /// Moves the job to the dead set.
    async fn bury_job(&self, job_id: Uuid, error: &str) -> PortResult<()>;

    /// Returns active jobs whose lease ran out to pending.
    async fn requeue_expired(&self, now: DateTime<Utc>) -> PortResult<u64>;

    async fn dead_jobs(&self, limit: i64) -> PortResult<Vec<Job>>;
}

//=========================================================================================
// AI Provider Port
//=========================================================================================

/// A single LLM vendor.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, AiError>;

    /// Streams deltas into `handler` and returns the assembled response.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        handler: &mut dyn StreamHandler,
    ) -> Result<ChatResponse, AiError>;

    fn provider_type(&self) -> ProviderType;

    fn model(&self) -> &str;

    async fn is_healthy(&self) -> bool;

    async fn close(&self) -> Result<(), AiError> {
        Ok(())
    }
}
