//! services/api/src/queue/client.rs

use mindhit_core::jobs::{EnqueueOutcome, Job, NewJob};
use mindhit_core::ports::JobQueue;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::service::{build_job, ApiResult};

/// Thin enqueue-side handle on the job bus.
#[derive(Clone)]
pub struct JobClient {
    queue: Arc<dyn JobQueue>,
}

impl JobClient {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn enqueue(&self, job: NewJob) -> ApiResult<EnqueueOutcome> {
        let type_tag = job.type_tag.clone();
        let queue = job.queue.clone();
        let outcome = self.queue.enqueue(job).await?;
        match outcome {
            EnqueueOutcome::Enqueued(id) => {
                info!(job_id = %id, job_type = %type_tag, queue = %queue, "job enqueued")
            }
            EnqueueOutcome::Duplicate => {
                debug!(job_type = %type_tag, "job already pending, enqueue skipped")
            }
        }
        Ok(outcome)
    }

    pub async fn enqueue_tag_extraction(&self, url_id: Uuid) -> ApiResult<EnqueueOutcome> {
        self.enqueue(build_job(NewJob::tag_extraction(url_id))?).await
    }

    pub async fn enqueue_session_cleanup(&self, max_age_hours: i64) -> ApiResult<EnqueueOutcome> {
        if max_age_hours <= 0 {
            return Err(ApiError::Validation(
                "max_age_hours must be positive".to_string(),
            ));
        }
        self.enqueue(build_job(NewJob::session_cleanup(max_age_hours))?).await
    }

    pub async fn dead_jobs(&self, limit: i64) -> ApiResult<Vec<Job>> {
        Ok(self.queue.dead_jobs(limit).await?)
    }
}
