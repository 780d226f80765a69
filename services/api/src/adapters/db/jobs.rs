//! services/api/src/adapters/db/jobs.rs
//!
//! The Postgres-backed job queue. Claims use `FOR UPDATE SKIP LOCKED` so any
//! number of workers can poll the same table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindhit_core::jobs::{EnqueueOutcome, Job, JobState, NewJob, LEASE_GRACE_SECS};
use mindhit_core::ports::{JobQueue, PortResult};
use sqlx::FromRow;
use uuid::Uuid;

use super::{corrupt, insert_job, unexpected, DbAdapter};

const JOB_COLUMNS: &str = "id, type_tag, payload, queue, state, max_retry, retried, timeout_secs, \
    process_at, last_error, unique_key, created_at";

#[derive(FromRow)]
struct JobRecord {
    id: Uuid,
    type_tag: String,
    payload: Vec<u8>,
    queue: String,
    state: String,
    max_retry: i32,
    retried: i32,
    timeout_secs: i64,
    process_at: DateTime<Utc>,
    last_error: Option<String>,
    unique_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl JobRecord {
    fn to_domain(self) -> PortResult<Job> {
        Ok(Job {
            id: self.id,
            type_tag: self.type_tag,
            payload: self.payload,
            queue: self.queue,
            state: self
                .state
                .parse::<JobState>()
                .map_err(|e| corrupt("jobs.state", e))?,
            max_retry: self.max_retry,
            retried: self.retried,
            timeout_secs: self.timeout_secs,
            process_at: self.process_at,
            last_error: self.last_error,
            unique_key: self.unique_key,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl JobQueue for DbAdapter {
    async fn enqueue(&self, job: NewJob) -> PortResult<EnqueueOutcome> {
        insert_job(&self.pool, &job).await.map_err(unexpected)
    }

    async fn dequeue(&self, queue: &str) -> PortResult<Option<Job>> {
        let record = sqlx::query_as::<_, JobRecord>(&format!(
            "UPDATE jobs SET state = 'active', updated_at = now(), \
             lease_until = now() + (timeout_secs + $2) * interval '1 second' \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE queue = $1 AND state = 'pending' AND process_at <= now() \
                 ORDER BY process_at, created_at \
                 FOR UPDATE SKIP LOCKED LIMIT 1 \
             ) RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(queue)
        .bind(LEASE_GRACE_SECS)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(JobRecord::to_domain).transpose()
    }

    async fn complete_job(&self, job_id: Uuid) -> PortResult<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'completed', lease_until = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn retry_job(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'pending', retried = retried + 1, process_at = $2, \
             last_error = $3, lease_until = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn bury_job(&self, job_id: Uuid, error: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE jobs SET state = 'dead', last_error = $2, lease_until = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', retried = retried + 1, \
             last_error = 'lease expired', lease_until = NULL, updated_at = now() \
             WHERE state = 'active' AND lease_until < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    async fn dead_jobs(&self, limit: i64) -> PortResult<Vec<Job>> {
        let records = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {} FROM jobs WHERE state = 'dead' ORDER BY updated_at DESC LIMIT $1",
            JOB_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(JobRecord::to_domain).collect()
    }
}
