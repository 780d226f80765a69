//! services/api/src/adapters/db/mindmaps.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindhit_core::domain::{CommitOutcome, MindmapGraph, MindmapStatus, NewTokenUsage, Session};
use mindhit_core::jobs::NewJob;
use mindhit_core::mindmap::{MindmapData, MindmapEdge, MindmapLayout, MindmapNode};
use mindhit_core::ports::{MindmapRepository, PortResult};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::sessions::{SessionRecord, SESSION_COLUMNS};
use super::usage::insert_usage;
use super::{corrupt, insert_job, unexpected, DbAdapter};

pub(super) const MINDMAP_COLUMNS: &str = "id, session_id, status, error_message, nodes, edges, \
    layout, generated_at, version, created_at, updated_at";

#[derive(FromRow)]
pub(super) struct MindmapRecord {
    id: Uuid,
    session_id: Uuid,
    status: String,
    error_message: Option<String>,
    nodes: Json<Vec<MindmapNode>>,
    edges: Json<Vec<MindmapEdge>>,
    layout: Option<Json<MindmapLayout>>,
    generated_at: DateTime<Utc>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MindmapRecord {
    pub(super) fn to_domain(self) -> PortResult<MindmapGraph> {
        Ok(MindmapGraph {
            id: self.id,
            session_id: self.session_id,
            status: self
                .status
                .parse::<MindmapStatus>()
                .map_err(|e| corrupt("mindmap_graphs.status", e))?,
            error_message: self.error_message,
            nodes: self.nodes.0,
            edges: self.edges.0,
            layout: self.layout.map(|l| l.0),
            generated_at: self.generated_at,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl MindmapRepository for DbAdapter {
    async fn find_mindmap(&self, session_id: Uuid) -> PortResult<Option<MindmapGraph>> {
        let record = sqlx::query_as::<_, MindmapRecord>(&format!(
            "SELECT {} FROM mindmap_graphs WHERE session_id = $1",
            MINDMAP_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(MindmapRecord::to_domain).transpose()
    }

    async fn ensure_mindmap(&self, session_id: Uuid) -> PortResult<MindmapGraph> {
        sqlx::query(
            "INSERT INTO mindmap_graphs (id, session_id, status) VALUES ($1, $2, 'pending') \
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        sqlx::query_as::<_, MindmapRecord>(&format!(
            "SELECT {} FROM mindmap_graphs WHERE session_id = $1",
            MINDMAP_COLUMNS
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?
        .to_domain()
    }

    async fn mark_mindmap_running(&self, session_id: Uuid) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO mindmap_graphs (id, session_id, status) VALUES ($1, $2, 'running') \
             ON CONFLICT (session_id) DO UPDATE SET status = 'running', error_message = NULL, \
             nodes = '[]', edges = '[]', layout = NULL, updated_at = now()",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn begin_regeneration(
        &self,
        session_id: Uuid,
        outbox: NewJob,
    ) -> PortResult<Option<(Session, MindmapGraph)>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let session = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE sessions AS s SET session_status = 'processing', \
             ended_at = COALESCE(s.ended_at, now()), updated_at = now() \
             WHERE s.id = $1 AND s.status = 'active' \
             AND s.session_status IN ('completed', 'failed') RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;
        let Some(session) = session else {
            return Ok(None);
        };

        let mindmap = sqlx::query_as::<_, MindmapRecord>(&format!(
            "INSERT INTO mindmap_graphs (id, session_id, status) VALUES ($1, $2, 'pending') \
             ON CONFLICT (session_id) DO UPDATE SET status = 'pending', error_message = NULL, \
             nodes = '[]', edges = '[]', layout = NULL, updated_at = now() RETURNING {}",
            MINDMAP_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        insert_job(&mut *tx, &outbox).await.map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        Ok(Some((session.to_domain()?, mindmap.to_domain()?)))
    }

    async fn commit_mindmap(
        &self,
        session_id: Uuid,
        data: &MindmapData,
        usage: Option<NewTokenUsage>,
    ) -> PortResult<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT session_status FROM sessions WHERE id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;
        if status.as_deref() != Some("processing") {
            return Ok(CommitOutcome::SessionNotProcessing);
        }

        if let Some(usage) = usage {
            insert_usage(&mut *tx, &usage).await?;
        }

        // Rows start at version 0, so the first commit yields 1.
        let mindmap = sqlx::query_as::<_, MindmapRecord>(&format!(
            "INSERT INTO mindmap_graphs (id, session_id, status, nodes, edges, layout, generated_at, version) \
             VALUES ($1, $2, 'completed', $3, $4, $5, now(), 1) \
             ON CONFLICT (session_id) DO UPDATE SET status = 'completed', error_message = NULL, \
             nodes = EXCLUDED.nodes, edges = EXCLUDED.edges, layout = EXCLUDED.layout, \
             generated_at = now(), updated_at = now(), \
             version = mindmap_graphs.version + 1 \
             RETURNING {}",
            MINDMAP_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(Json(&data.nodes))
        .bind(Json(&data.edges))
        .bind(Json(&data.layout))
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query(
            "UPDATE sessions SET session_status = 'completed', \
             ended_at = COALESCE(ended_at, now()), updated_at = now() WHERE id = $1",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(CommitOutcome::Committed(mindmap.to_domain()?))
    }

    async fn fail_mindmap(&self, session_id: Uuid, error: &str) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let result = sqlx::query(
            "UPDATE sessions SET session_status = 'failed', \
             ended_at = COALESCE(ended_at, now()), updated_at = now() \
             WHERE id = $1 AND status = 'active' AND session_status = 'processing'",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO mindmap_graphs (id, session_id, status, error_message) \
             VALUES ($1, $2, 'failed', $3) \
             ON CONFLICT (session_id) DO UPDATE SET status = 'failed', \
             error_message = EXCLUDED.error_message, nodes = '[]', edges = '[]', layout = NULL, \
             updated_at = now()",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(true)
    }
}
