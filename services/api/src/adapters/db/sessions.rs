//! services/api/src/adapters/db/sessions.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindhit_core::domain::{
    Highlight, PageVisit, PageVisitWithUrl, RecordStatus, Session, SessionDetails, SessionStatus,
    Url,
};
use mindhit_core::jobs::NewJob;
use mindhit_core::ports::{PortResult, SessionRepository};
use sqlx::FromRow;
use uuid::Uuid;

use super::mindmaps::{MindmapRecord, MINDMAP_COLUMNS};
use super::{corrupt, insert_job, not_found_or_unexpected, unexpected, DbAdapter};

pub(super) const SESSION_COLUMNS: &str = "s.id, s.user_id, s.title, s.description, \
    s.session_status, s.started_at, s.ended_at, s.status, s.deleted_at, s.created_at, s.updated_at";

//=========================================================================================
// Database Record Structs
//=========================================================================================

#[derive(FromRow)]
pub(super) struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    title: Option<String>,
    description: Option<String>,
    session_status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: String,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub(super) fn to_domain(self) -> PortResult<Session> {
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            session_status: self
                .session_status
                .parse::<SessionStatus>()
                .map_err(|e| corrupt("sessions.session_status", e))?,
            started_at: self.started_at,
            ended_at: self.ended_at,
            record_status: self
                .status
                .parse::<RecordStatus>()
                .map_err(|e| corrupt("sessions.status", e))?,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct VisitWithUrlRecord {
    id: Uuid,
    session_id: Uuid,
    url_id: Uuid,
    entered_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    max_scroll_depth: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    url: String,
    url_hash: String,
    url_title: Option<String>,
    url_content: Option<String>,
    url_summary: Option<String>,
    url_keywords: Vec<String>,
    url_crawled_at: Option<DateTime<Utc>>,
    url_created_at: DateTime<Utc>,
    url_updated_at: DateTime<Utc>,
}

impl VisitWithUrlRecord {
    fn to_domain(self) -> PageVisitWithUrl {
        PageVisitWithUrl {
            visit: PageVisit {
                id: self.id,
                session_id: self.session_id,
                url_id: self.url_id,
                entered_at: self.entered_at,
                left_at: self.left_at,
                duration_ms: self.duration_ms,
                max_scroll_depth: self.max_scroll_depth,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            url: Url {
                id: self.url_id,
                url: self.url,
                url_hash: self.url_hash,
                title: self.url_title,
                content: self.url_content,
                summary: self.url_summary,
                keywords: self.url_keywords,
                crawled_at: self.url_crawled_at,
                created_at: self.url_created_at,
                updated_at: self.url_updated_at,
            },
        }
    }
}

#[derive(FromRow)]
pub(super) struct HighlightRecord {
    id: Uuid,
    session_id: Uuid,
    page_visit_id: Option<Uuid>,
    text: String,
    selector: Option<String>,
    color: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl HighlightRecord {
    pub(super) fn to_domain(self) -> Highlight {
        Highlight {
            id: self.id,
            session_id: self.session_id,
            page_visit_id: self.page_visit_id,
            text: self.text,
            selector: self.selector,
            color: self.color,
            note: self.note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn status_tags(statuses: &[SessionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

//=========================================================================================
// `SessionRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionRepository for DbAdapter {
    async fn create_session(&self, user_id: Uuid) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO sessions AS s (id, user_id, session_status, started_at) \
             VALUES ($1, $2, 'recording', now()) RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        record.to_domain()
    }

    async fn find_session(&self, session_id: Uuid) -> PortResult<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.id = $1 AND s.status = 'active' AND u.status = 'active'",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(SessionRecord::to_domain).transpose()
    }

    async fn list_sessions_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions s \
             WHERE s.user_id = $1 AND s.status = 'active' \
             ORDER BY s.created_at DESC LIMIT $2 OFFSET $3",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(SessionRecord::to_domain).collect()
    }

    async fn update_session_metadata(
        &self,
        session_id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
    ) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE sessions AS s SET title = COALESCE($2, s.title), \
             description = COALESCE($3, s.description), updated_at = now() \
             WHERE s.id = $1 AND s.status = 'active' RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(title)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, || format!("session {}", session_id)))?;

        record.to_domain()
    }

    async fn transition_session(
        &self,
        session_id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        outbox: Option<NewJob>,
    ) -> PortResult<Option<Session>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE sessions AS s SET session_status = $2, \
             ended_at = CASE WHEN $3 THEN COALESCE(s.ended_at, now()) ELSE NULL END, \
             updated_at = now() \
             WHERE s.id = $1 AND s.status = 'active' AND s.session_status = ANY($4) \
             RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(to.as_str())
        .bind(to.is_ended())
        .bind(status_tags(from))
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        let Some(record) = record else {
            return Ok(None);
        };
        if let Some(job) = outbox {
            insert_job(&mut *tx, &job).await.map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;

        record.to_domain().map(Some)
    }

    async fn soft_delete_session(&self, session_id: Uuid) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'inactive', deleted_at = now(), updated_at = now() \
             WHERE id = $1 AND status = 'active'",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_session_details(&self, session_id: Uuid) -> PortResult<Option<SessionDetails>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let session = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.id = $1 AND s.status = 'active' AND u.status = 'active'",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;
        let Some(session) = session else {
            return Ok(None);
        };

        let visits = sqlx::query_as::<_, VisitWithUrlRecord>(
            "SELECT pv.id, pv.session_id, pv.url_id, pv.entered_at, pv.left_at, pv.duration_ms, \
             pv.max_scroll_depth, pv.created_at, pv.updated_at, \
             u.url, u.url_hash, u.title AS url_title, u.content AS url_content, \
             u.summary AS url_summary, u.keywords AS url_keywords, u.crawled_at AS url_crawled_at, \
             u.created_at AS url_created_at, u.updated_at AS url_updated_at \
             FROM page_visits pv JOIN urls u ON u.id = pv.url_id \
             WHERE pv.session_id = $1 ORDER BY pv.entered_at ASC, pv.created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;

        let highlights = sqlx::query_as::<_, HighlightRecord>(
            "SELECT id, session_id, page_visit_id, text, selector, color, note, created_at, updated_at \
             FROM highlights WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;

        let mindmap = sqlx::query_as::<_, MindmapRecord>(&format!(
            "SELECT {} FROM mindmap_graphs WHERE session_id = $1",
            MINDMAP_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;

        Ok(Some(SessionDetails {
            session: session.to_domain()?,
            page_visits: visits.into_iter().map(VisitWithUrlRecord::to_domain).collect(),
            highlights: highlights.into_iter().map(HighlightRecord::to_domain).collect(),
            mindmap: mindmap.map(MindmapRecord::to_domain).transpose()?,
        }))
    }

    async fn fail_stale_sessions(&self, updated_before: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET session_status = 'failed', \
             ended_at = COALESCE(ended_at, now()), updated_at = now() \
             WHERE status = 'active' AND session_status IN ('recording', 'paused') \
             AND updated_at < $1",
        )
        .bind(updated_before)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected())
    }
}
