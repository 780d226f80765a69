//! services/api/src/adapters/db/events.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindhit_core::domain::{
    event_types, EventStats, Highlight, NewHighlight, NewRawEvent, PageVisit, RawEvent,
};
use mindhit_core::ports::{EventRepository, PortResult};
use sqlx::FromRow;
use uuid::Uuid;

use super::sessions::HighlightRecord;
use super::{not_found_or_unexpected, unexpected, DbAdapter};

const RAW_EVENT_COLUMNS: &str =
    "id, session_id, event_type, timestamp, payload, processed, processed_at, created_at, updated_at";

#[derive(FromRow)]
struct RawEventRecord {
    id: Uuid,
    session_id: Uuid,
    event_type: String,
    timestamp: DateTime<Utc>,
    payload: String,
    processed: bool,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RawEventRecord {
    fn to_domain(self) -> RawEvent {
        RawEvent {
            id: self.id,
            session_id: self.session_id,
            event_type: self.event_type,
            timestamp: self.timestamp,
            payload: self.payload,
            processed: self.processed,
            processed_at: self.processed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct PageVisitRecord {
    id: Uuid,
    session_id: Uuid,
    url_id: Uuid,
    entered_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    max_scroll_depth: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PageVisitRecord {
    fn to_domain(self) -> PageVisit {
        PageVisit {
            id: self.id,
            session_id: self.session_id,
            url_id: self.url_id,
            entered_at: self.entered_at,
            left_at: self.left_at,
            duration_ms: self.duration_ms,
            max_scroll_depth: self.max_scroll_depth,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct StatsRecord {
    total_events: i64,
    page_visits: i64,
    highlights: i64,
}

#[async_trait]
impl EventRepository for DbAdapter {
    async fn insert_raw_event(&self, event: NewRawEvent) -> PortResult<RawEvent> {
        let record = sqlx::query_as::<_, RawEventRecord>(&format!(
            "INSERT INTO raw_events (id, session_id, event_type, timestamp, payload) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            RAW_EVENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(event.session_id)
        .bind(&event.event_type)
        .bind(event.timestamp)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.to_domain())
    }

    async fn mark_raw_event_processed(&self, event_id: Uuid) -> PortResult<()> {
        sqlx::query(
            "UPDATE raw_events SET processed = true, processed_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn insert_page_visit(
        &self,
        session_id: Uuid,
        url_id: Uuid,
        entered_at: DateTime<Utc>,
    ) -> PortResult<PageVisit> {
        let record = sqlx::query_as::<_, PageVisitRecord>(
            "INSERT INTO page_visits (id, session_id, url_id, entered_at) VALUES ($1, $2, $3, $4) \
             RETURNING id, session_id, url_id, entered_at, left_at, duration_ms, max_scroll_depth, \
             created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(url_id)
        .bind(entered_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, || format!("url {}", url_id)))?;

        Ok(record.to_domain())
    }

    async fn insert_highlight(&self, highlight: NewHighlight) -> PortResult<Highlight> {
        let record = sqlx::query_as::<_, HighlightRecord>(
            "INSERT INTO highlights (id, session_id, page_visit_id, text, selector, color) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, session_id, page_visit_id, text, selector, color, note, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(highlight.session_id)
        .bind(highlight.page_visit_id)
        .bind(&highlight.text)
        .bind(&highlight.selector)
        .bind(&highlight.color)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.to_domain())
    }

    async fn list_raw_events(
        &self,
        session_id: Uuid,
        event_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> PortResult<(Vec<RawEvent>, i64)> {
        let records = sqlx::query_as::<_, RawEventRecord>(&format!(
            "SELECT {} FROM raw_events \
             WHERE session_id = $1 AND ($2::text IS NULL OR event_type = $2) \
             ORDER BY timestamp DESC, created_at DESC LIMIT $3 OFFSET $4",
            RAW_EVENT_COLUMNS
        ))
        .bind(session_id)
        .bind(event_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM raw_events \
             WHERE session_id = $1 AND ($2::text IS NULL OR event_type = $2)",
        )
        .bind(session_id)
        .bind(event_type)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok((records.into_iter().map(RawEventRecord::to_domain).collect(), total))
    }

    async fn event_stats(&self, session_id: Uuid) -> PortResult<EventStats> {
        let counts = sqlx::query_as::<_, StatsRecord>(
            "SELECT COUNT(*) AS total_events, \
             COUNT(*) FILTER (WHERE event_type = $2) AS page_visits, \
             COUNT(*) FILTER (WHERE event_type = $3) AS highlights \
             FROM raw_events WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(event_types::PAGE_VISIT)
        .bind(event_types::HIGHLIGHT)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let unique_urls: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT url_id) FROM page_visits WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(EventStats {
            total_events: counts.total_events,
            page_visits: counts.page_visits,
            highlights: counts.highlights,
            unique_urls,
        })
    }
}
