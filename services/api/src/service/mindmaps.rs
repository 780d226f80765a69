//! services/api/src/service/mindmaps.rs
//!
//! Reading a session's mindmap and asking for a new one.

use mindhit_core::domain::{MindmapGraph, MindmapStatus, Session, SessionStatus};
use mindhit_core::jobs::NewJob;
use mindhit_core::lifecycle::{InvalidTransition, SessionAction};
use mindhit_core::ports::DatabaseService;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{build_job, ApiResult, SessionService};
use crate::error::ApiError;

#[derive(Clone)]
pub struct MindmapService {
    db: Arc<dyn DatabaseService>,
    sessions: SessionService,
}

impl MindmapService {
    pub fn new(db: Arc<dyn DatabaseService>, sessions: SessionService) -> Self {
        Self { db, sessions }
    }

    pub async fn get(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<MindmapGraph> {
        self.sessions.get(user_id, session_id).await?;
        self.db
            .find_mindmap(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("mindmap".to_string()))
    }

    /// Queues generation for a finished session.
    ///
    /// A session still generating returns its current row. A completed mindmap is
    /// returned as-is unless `force` is set. Sessions that are still recording
    /// cannot be generated from.
    pub async fn generate(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        force: bool,
    ) -> ApiResult<MindmapGraph> {
        let session = self.sessions.get(user_id, session_id).await?;
        match session.session_status {
            SessionStatus::Recording | SessionStatus::Paused => Err(InvalidTransition {
                from: session.session_status,
                action: SessionAction::Regenerate,
            }
            .into()),
            SessionStatus::Processing => Ok(self.db.ensure_mindmap(session.id).await?),
            SessionStatus::Completed if !force => match self.db.find_mindmap(session.id).await? {
                Some(mindmap) if mindmap.status == MindmapStatus::Completed => Ok(mindmap),
                _ => self.regenerate(&session).await,
            },
            SessionStatus::Completed | SessionStatus::Failed => self.regenerate(&session).await,
        }
    }

    async fn regenerate(&self, session: &Session) -> ApiResult<MindmapGraph> {
        let job = build_job(NewJob::mindmap_generate(session.id, session.user_id))?;
        if let Some((_, mindmap)) = self.db.begin_regeneration(session.id, job).await? {
            info!(session_id = %session.id, "mindmap regeneration queued");
            return Ok(mindmap);
        }

        // The status moved under us; answer for where it is now.
        let current = self.sessions.get(session.user_id, session.id).await?;
        if current.session_status == SessionStatus::Processing {
            return Ok(self.db.ensure_mindmap(current.id).await?);
        }
        Err(InvalidTransition {
            from: current.session_status,
            action: SessionAction::Regenerate,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use mindhit_core::jobs::TYPE_MINDMAP_GENERATE;
    use mindhit_core::mindmap::{MindmapData, MindmapLayout};
    use mindhit_core::ports::MindmapRepository;

    struct Fixture {
        store: Arc<MemoryStore>,
        sessions: SessionService,
        mindmaps: MindmapService,
        user: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user();
        let sessions = SessionService::new(store.clone());
        let mindmaps = MindmapService::new(store.clone(), sessions.clone());
        Fixture {
            store,
            sessions,
            mindmaps,
            user,
        }
    }

    fn empty_graph() -> MindmapData {
        MindmapData {
            nodes: vec![],
            edges: vec![],
            layout: MindmapLayout::galaxy(),
        }
    }

    #[tokio::test]
    async fn recording_sessions_cannot_generate() {
        let f = fixture();
        let s = f.sessions.start(f.user).await.unwrap();
        let err = f.mindmaps.generate(f.user, s.id, true).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition(_)));
        assert!(matches!(f.mindmaps.get(f.user, s.id).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn processing_returns_a_pending_row_without_new_jobs() {
        let f = fixture();
        let s = f.sessions.start(f.user).await.unwrap();
        f.sessions.stop(f.user, s.id).await.unwrap();
        let mindmap = f.mindmaps.generate(f.user, s.id, false).await.unwrap();
        assert_eq!(mindmap.status, MindmapStatus::Pending);
        assert_eq!(f.store.jobs_of_type(TYPE_MINDMAP_GENERATE).len(), 1);
    }

    #[tokio::test]
    async fn completed_mindmap_needs_force() {
        let f = fixture();
        let s = f.sessions.start(f.user).await.unwrap();
        f.sessions.stop(f.user, s.id).await.unwrap();
        f.store.commit_mindmap(s.id, &empty_graph(), None).await.unwrap();

        let kept = f.mindmaps.generate(f.user, s.id, false).await.unwrap();
        assert_eq!(kept.status, MindmapStatus::Completed);
        assert_eq!(f.store.jobs_of_type(TYPE_MINDMAP_GENERATE).len(), 1);

        let reset = f.mindmaps.generate(f.user, s.id, true).await.unwrap();
        assert_eq!(reset.status, MindmapStatus::Pending);
        assert_eq!(
            f.store.session_row(s.id).unwrap().session_status,
            SessionStatus::Processing
        );
        assert_eq!(f.store.jobs_of_type(TYPE_MINDMAP_GENERATE).len(), 2);
    }

    #[tokio::test]
    async fn failed_sessions_regenerate_without_force() {
        let f = fixture();
        let s = f.sessions.start(f.user).await.unwrap();
        f.sessions.stop(f.user, s.id).await.unwrap();
        f.store.fail_mindmap(s.id, "provider outage").await.unwrap();

        let mindmap = f.mindmaps.generate(f.user, s.id, false).await.unwrap();
        assert_eq!(mindmap.status, MindmapStatus::Pending);
        assert_eq!(mindmap.error_message, None);
    }
}
