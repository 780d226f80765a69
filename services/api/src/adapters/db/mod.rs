//! services/api/src/adapters/db/mod.rs
//!
//! The Postgres adapter. `DbAdapter` implements every storage port from the core
//! crate plus the job queue, so lifecycle changes and the jobs they trigger can
//! share one transaction.

mod ai;
mod events;
mod jobs;
mod mindmaps;
mod sessions;
mod urls;
mod usage;

use mindhit_core::jobs::{EnqueueOutcome, NewJob};
use mindhit_core::ports::PortError;
use sqlx::PgPool;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage and queue ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the embedded migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

//=========================================================================================
// Shared Helpers
//=========================================================================================

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        other => PortError::Unexpected(other.to_string()),
    }
}

fn corrupt(column: &str, detail: String) -> PortError {
    PortError::Unexpected(format!("corrupt value in column {}: {}", column, detail))
}

/// Writes a job row; used both by the queue and by lifecycle outboxes.
async fn insert_job<'e, E>(executor: E, job: &NewJob) -> Result<EnqueueOutcome, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO jobs (id, type_tag, payload, queue, state, max_retry, retried,
                          timeout_secs, process_at, unique_key)
        VALUES ($1, $2, $3, $4, 'pending', $5, 0, $6, $7, $8)
        ON CONFLICT (unique_key) WHERE unique_key IS NOT NULL AND state IN ('pending', 'active')
        DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&job.type_tag)
    .bind(&job.payload)
    .bind(&job.queue)
    .bind(job.max_retry)
    .bind(job.timeout_secs)
    .bind(job.process_at)
    .bind(&job.unique_key)
    .fetch_optional(executor)
    .await?;

    Ok(match inserted {
        Some(id) => EnqueueOutcome::Enqueued(id),
        None => EnqueueOutcome::Duplicate,
    })
}
