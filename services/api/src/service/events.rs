//! services/api/src/service/events.rs
//!
//! Batch ingestion of extension events and the read side over them.
//!
//! Each event is stored verbatim first and then projected into a typed row. A
//! failure on one event is logged and skipped; it never aborts the batch.

use mindhit_core::domain::{
    event_types, BatchEvent, EventStats, NewHighlight, NewRawEvent, RawEvent, Session,
    DEFAULT_HIGHLIGHT_COLOR,
};
use mindhit_core::jobs::{EnqueueOutcome, NewJob};
use mindhit_core::ports::{DatabaseService, JobQueue};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{build_job, ApiResult, SessionService, UrlRegistry};
use crate::error::ApiError;

pub const DEFAULT_EVENT_PAGE: i64 = 50;
pub const MAX_EVENT_PAGE: i64 = 200;

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub processed: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct EventService {
    db: Arc<dyn DatabaseService>,
    queue: Arc<dyn JobQueue>,
    sessions: SessionService,
    urls: UrlRegistry,
}

impl EventService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        queue: Arc<dyn JobQueue>,
        sessions: SessionService,
        urls: UrlRegistry,
    ) -> Self {
        Self {
            db,
            queue,
            sessions,
            urls,
        }
    }

    /// Persists `events` in input order for a session the caller owns.
    pub async fn ingest_batch(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        events: &[BatchEvent],
    ) -> ApiResult<IngestSummary> {
        let session = self.sessions.get(user_id, session_id).await?;
        if events.is_empty() {
            return Err(ApiError::Validation("no events provided".to_string()));
        }
        if !session.session_status.accepts_events() {
            return Err(ApiError::SessionNotAcceptingEvents(session.session_status));
        }

        let mut processed = 0;
        for (index, event) in events.iter().enumerate() {
            match self.ingest_one(&session, event).await {
                Ok(()) => processed += 1,
                Err(e) => warn!(
                    session_id = %session.id,
                    index,
                    event_type = %event.event_type,
                    error = %e,
                    "skipping event"
                ),
            }
        }

        info!(
            session_id = %session.id,
            processed,
            total = events.len(),
            "event batch ingested"
        );
        Ok(IngestSummary {
            processed,
            total: events.len(),
        })
    }

    async fn ingest_one(&self, session: &Session, event: &BatchEvent) -> ApiResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| ApiError::Validation(format!("event is not serialisable: {}", e)))?;
        let raw = self
            .db
            .insert_raw_event(NewRawEvent {
                session_id: session.id,
                event_type: event.event_type.clone(),
                timestamp: event.occurred_at(),
                payload,
            })
            .await?;

        match event.event_type.as_str() {
            event_types::PAGE_VISIT => self.project_page_visit(session, event).await?,
            event_types::HIGHLIGHT => self.project_highlight(session, event).await?,
            _ => {}
        }

        self.db.mark_raw_event_processed(raw.id).await?;
        Ok(())
    }

    async fn project_page_visit(&self, session: &Session, event: &BatchEvent) -> ApiResult<()> {
        let Some(raw_url) = event.url.as_deref().filter(|u| !u.is_empty()) else {
            debug!(session_id = %session.id, "page visit without url, raw event only");
            return Ok(());
        };

        let url = self
            .urls
            .get_or_create(raw_url, event.title.as_deref(), event.content.as_deref())
            .await?;
        self.db
            .insert_page_visit(session.id, url.id, event.occurred_at())
            .await?;

        if !url.has_keywords() {
            self.request_tags(url.id).await;
        }
        Ok(())
    }

    async fn project_highlight(&self, session: &Session, event: &BatchEvent) -> ApiResult<()> {
        let Some(text) = event.payload_str("text").filter(|t| !t.is_empty()) else {
            debug!(session_id = %session.id, "highlight without text, raw event only");
            return Ok(());
        };

        self.db
            .insert_highlight(NewHighlight {
                session_id: session.id,
                page_visit_id: None,
                text: text.to_string(),
                selector: event
                    .payload_str("selector")
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                color: event
                    .payload_str("color")
                    .filter(|c| !c.is_empty())
                    .unwrap_or(DEFAULT_HIGHLIGHT_COLOR)
                    .to_string(),
            })
            .await?;
        Ok(())
    }

    /// Best effort: the visit is already stored, and the backfill picks up URLs
    /// whose job could not be queued.
    async fn request_tags(&self, url_id: Uuid) {
        let job = match build_job(NewJob::tag_extraction(url_id)) {
            Ok(job) => job,
            Err(e) => {
                warn!(url_id = %url_id, error = %e, "could not build tag extraction job");
                return;
            }
        };
        match self.queue.enqueue(job).await {
            Ok(EnqueueOutcome::Enqueued(job_id)) => {
                debug!(url_id = %url_id, job_id = %job_id, "tag extraction queued")
            }
            Ok(EnqueueOutcome::Duplicate) => {
                debug!(url_id = %url_id, "tag extraction already queued")
            }
            Err(e) => warn!(url_id = %url_id, error = %e, "failed to queue tag extraction"),
        }
    }

    /// Raw events newest first, plus the unpaginated count.
    pub async fn list(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        event_type: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ApiResult<(Vec<RawEvent>, i64)> {
        self.sessions.get(user_id, session_id).await?;
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_EVENT_PAGE),
            _ => DEFAULT_EVENT_PAGE,
        };
        let offset = offset.unwrap_or(0).max(0);
        let event_type = event_type.filter(|t| !t.is_empty());
        Ok(self
            .db
            .list_raw_events(session_id, event_type, limit, offset)
            .await?)
    }

    pub async fn stats(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<EventStats> {
        self.sessions.get(user_id, session_id).await?;
        Ok(self.db.event_stats(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use mindhit_core::jobs::TYPE_URL_TAG_EXTRACTION;
    use mindhit_core::SessionStatus;

    fn service() -> (Arc<MemoryStore>, EventService, SessionService, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user();
        let sessions = SessionService::new(store.clone());
        let events = EventService::new(
            store.clone(),
            store.clone(),
            sessions.clone(),
            UrlRegistry::new(store.clone()),
        );
        (store, events, sessions, user)
    }

    fn visit(url: &str, ts: i64) -> BatchEvent {
        BatchEvent {
            event_type: "page_visit".into(),
            timestamp: ts,
            url: Some(url.into()),
            title: Some("T".into()),
            content: None,
            payload: None,
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_validation_error() {
        let (_, events, sessions, user) = service();
        let s = sessions.start(user).await.unwrap();
        let err = events.ingest_batch(user, s.id, &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn stopped_sessions_reject_events() {
        let (_, events, sessions, user) = service();
        let s = sessions.start(user).await.unwrap();
        sessions.stop(user, s.id).await.unwrap();
        let err = events
            .ingest_batch(user, s.id, &[visit("https://a.dev", 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::SessionNotAcceptingEvents(SessionStatus::Processing)
        ));
    }

    #[tokio::test]
    async fn paused_sessions_take_buffered_events() {
        let (store, events, sessions, user) = service();
        let s = sessions.start(user).await.unwrap();
        sessions.pause(user, s.id).await.unwrap();
        let summary = events
            .ingest_batch(user, s.id, &[visit("https://a.dev", 1)])
            .await
            .unwrap();
        assert_eq!(summary, IngestSummary { processed: 1, total: 1 });
        assert_eq!(store.page_visits(s.id).len(), 1);
    }

    #[tokio::test]
    async fn a_failing_event_does_not_abort_the_batch() {
        let (store, events, sessions, user) = service();
        let s = sessions.start(user).await.unwrap();
        store.fail_operation("insert_page_visit");
        let batch = vec![
            visit("https://a.dev", 1),
            BatchEvent {
                event_type: "scroll".into(),
                timestamp: 2,
                url: None,
                title: None,
                content: None,
                payload: None,
            },
        ];
        let summary = events.ingest_batch(user, s.id, &batch).await.unwrap();
        assert_eq!(summary, IngestSummary { processed: 1, total: 2 });
        assert_eq!(store.raw_events(s.id).len(), 2);
    }

    #[tokio::test]
    async fn tag_extraction_is_queued_once_per_url() {
        let (store, events, sessions, user) = service();
        let s = sessions.start(user).await.unwrap();
        events
            .ingest_batch(
                user,
                s.id,
                &[visit("https://a.dev/x", 1), visit("https://a.dev/x/", 2)],
            )
            .await
            .unwrap();
        assert_eq!(store.jobs_of_type(TYPE_URL_TAG_EXTRACTION).len(), 1);
    }

    #[tokio::test]
    async fn list_defaults_and_caps_the_page() {
        let (_, events, sessions, user) = service();
        let s = sessions.start(user).await.unwrap();
        let batch: Vec<BatchEvent> = (0..3).map(|i| visit("https://a.dev", i)).collect();
        events.ingest_batch(user, s.id, &batch).await.unwrap();

        let (rows, total) = events.list(user, s.id, None, Some(2), None).await.unwrap();
        assert_eq!((rows.len(), total), (2, 3));
        assert!(rows[0].timestamp >= rows[1].timestamp);
        let (rows, _) = events
            .list(user, s.id, Some("highlight"), None, None)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
