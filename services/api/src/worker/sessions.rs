//! services/api/src/worker/sessions.rs
//!
//! Session housekeeping jobs.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mindhit_core::jobs::{Job, SessionCleanupPayload, SessionProcessPayload};
use mindhit_core::ports::DatabaseService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::queue::{JobError, JobHandler, JobResult};

/// `session:cleanup`: fails recording/paused sessions nobody has touched for
/// `max_age_hours`.
pub struct CleanupHandler {
    db: Arc<dyn DatabaseService>,
}

impl CleanupHandler {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    async fn handle(&self, job: &Job, _cancel: &CancellationToken) -> JobResult {
        let payload: SessionCleanupPayload = job.decode()?;
        if payload.max_age_hours <= 0 {
            return Err(JobError::Fatal(format!(
                "max_age_hours must be positive, got {}",
                payload.max_age_hours
            )));
        }

        let cutoff = Utc::now() - Duration::hours(payload.max_age_hours);
        let failed = self
            .db
            .fail_stale_sessions(cutoff)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?;
        info!(
            max_age_hours = payload.max_age_hours,
            sessions_failed = failed,
            "stale session sweep finished"
        );
        Ok(())
    }
}

/// `session:process`: kept so old jobs drain. Mindmap generation is the only
/// path that completes a session.
pub struct SessionProcessHandler;

#[async_trait]
impl JobHandler for SessionProcessHandler {
    async fn handle(&self, job: &Job, _cancel: &CancellationToken) -> JobResult {
        let payload: SessionProcessPayload = job.decode()?;
        info!(session_id = %payload.session_id, "session:process is a no-op");
        Ok(())
    }
}
