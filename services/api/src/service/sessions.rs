//! services/api/src/service/sessions.rs
//!
//! Session ownership and lifecycle. Every status change is validated against the
//! lifecycle table first and then applied with a conditional write, so two racing
//! requests cannot both move the same session.

use mindhit_core::domain::{Session, SessionDetails};
use mindhit_core::jobs::NewJob;
use mindhit_core::lifecycle::{self, InvalidTransition, SessionAction};
use mindhit_core::ports::DatabaseService;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{build_job, ApiResult};
use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct SessionService {
    db: Arc<dyn DatabaseService>,
}

impl SessionService {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn start(&self, user_id: Uuid) -> ApiResult<Session> {
        let session = self.db.create_session(user_id).await?;
        info!(session_id = %session.id, user_id = %user_id, "session started");
        Ok(session)
    }

    /// Loads a live session and checks that `user_id` owns it.
    pub async fn get(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<Session> {
        let session = self
            .db
            .find_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("session".to_string()))?;
        if session.user_id != user_id {
            return Err(ApiError::NotOwned);
        }
        Ok(session)
    }

    pub async fn get_with_details(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> ApiResult<SessionDetails> {
        let details = self
            .db
            .load_session_details(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("session".to_string()))?;
        if details.session.user_id != user_id {
            return Err(ApiError::NotOwned);
        }
        Ok(details)
    }

    /// Newest first. `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ApiResult<Vec<Session>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);
        Ok(self.db.list_sessions_by_user(user_id, limit, offset).await?)
    }

    pub async fn update_metadata(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
    ) -> ApiResult<Session> {
        self.get(user_id, session_id).await?;
        Ok(self
            .db
            .update_session_metadata(session_id, title, description)
            .await?)
    }

    pub async fn pause(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<Session> {
        let session = self.get(user_id, session_id).await?;
        self.apply(&session, SessionAction::Pause, None).await
    }

    pub async fn resume(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<Session> {
        let session = self.get(user_id, session_id).await?;
        self.apply(&session, SessionAction::Resume, None).await
    }

    /// Ends recording and queues mindmap generation in the same write. Stopping a
    /// session that has already ended returns it unchanged and queues nothing.
    pub async fn stop(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<Session> {
        let session = self.get(user_id, session_id).await?;
        if session.session_status.is_ended() {
            return Ok(session);
        }

        let job = build_job(NewJob::mindmap_generate(session.id, session.user_id))?;
        match self.apply(&session, SessionAction::Stop, Some(job)).await {
            Ok(stopped) => Ok(stopped),
            // Another stop won the race.
            Err(ApiError::InvalidStateTransition(InvalidTransition { from, .. }))
                if from.is_ended() =>
            {
                self.get(user_id, session_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Soft delete; allowed from every status.
    pub async fn delete(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<()> {
        self.get(user_id, session_id).await?;
        if !self.db.soft_delete_session(session_id).await? {
            return Err(ApiError::NotFound("session".to_string()));
        }
        info!(session_id = %session_id, "session deleted");
        Ok(())
    }

    /// Validates `action` and applies it only if the stored status still allows it.
    async fn apply(
        &self,
        session: &Session,
        action: SessionAction,
        outbox: Option<NewJob>,
    ) -> ApiResult<Session> {
        let to = lifecycle::transition(session.session_status, action)?;
        match self
            .db
            .transition_session(session.id, action.sources(), to, outbox)
            .await?
        {
            Some(updated) => {
                info!(
                    session_id = %session.id,
                    action = %action,
                    from = %session.session_status,
                    to = %to,
                    "session transitioned"
                );
                Ok(updated)
            }
            None => {
                let current = self
                    .db
                    .find_session(session.id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound("session".to_string()))?;
                Err(InvalidTransition {
                    from: current.session_status,
                    action,
                }
                .into())
            }
        }
    }
}
