//! crates/mindhit_core/src/jobs.rs
//!
//! Job type tags, their payloads, and the records the job bus stores.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const TYPE_SESSION_PROCESS: &str = "session:process";
pub const TYPE_SESSION_CLEANUP: &str = "session:cleanup";
pub const TYPE_URL_TAG_EXTRACTION: &str = "url:tag_extraction";
pub const TYPE_MINDMAP_GENERATE: &str = "mindmap:generate";

pub const QUEUE_CRITICAL: &str = "critical";
pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_LOW: &str = "low";

/// Relative dequeue weight of each queue.
pub const QUEUE_WEIGHTS: [(&str, u32); 3] = [(QUEUE_CRITICAL, 6), (QUEUE_DEFAULT, 3), (QUEUE_LOW, 1)];

pub const DEFAULT_MAX_RETRY: i32 = 25;
pub const DEFAULT_TIMEOUT_SECS: i64 = 30 * 60;
/// Extra time past a job's timeout before its claim may be taken over.
pub const LEASE_GRACE_SECS: i64 = 30;

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProcessPayload {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCleanupPayload {
    pub max_age_hours: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlTagExtractionPayload {
    pub url_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapGeneratePayload {
    pub session_id: Uuid,
    pub user_id: Uuid,
}

//=========================================================================================
// Stored Jobs
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// A job ready to be written to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub type_tag: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub max_retry: i32,
    pub timeout_secs: i64,
    pub process_at: DateTime<Utc>,
    pub unique_key: Option<String>,
}

impl NewJob {
    /// Serialises `payload` as JSON and applies `opts`.
    pub fn new<T: Serialize>(
        type_tag: &str,
        payload: &T,
        opts: EnqueueOptions,
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            type_tag: type_tag.to_string(),
            payload: serde_json::to_vec(payload)?,
            queue: opts.queue,
            max_retry: opts.max_retry,
            timeout_secs: opts.timeout.num_seconds(),
            process_at: opts.process_at.unwrap_or(now) + opts.process_in,
            unique_key: opts.unique_key,
        })
    }

    pub fn tag_extraction(url_id: Uuid) -> Result<Self, serde_json::Error> {
        NewJob::new(
            TYPE_URL_TAG_EXTRACTION,
            &UrlTagExtractionPayload { url_id },
            EnqueueOptions::default()
                .queue(QUEUE_LOW)
                .max_retry(3)
                .timeout(Duration::minutes(2))
                .unique_key(format!("{}:{}", TYPE_URL_TAG_EXTRACTION, url_id)),
        )
    }

    /// No unique key: the lifecycle guard that writes this job already admits
    /// only one per stop or regenerate.
    pub fn mindmap_generate(session_id: Uuid, user_id: Uuid) -> Result<Self, serde_json::Error> {
        NewJob::new(
            TYPE_MINDMAP_GENERATE,
            &MindmapGeneratePayload { session_id, user_id },
            EnqueueOptions::default()
                .queue(QUEUE_CRITICAL)
                .max_retry(3)
                .timeout(Duration::minutes(5)),
        )
    }

    pub fn session_cleanup(max_age_hours: i64) -> Result<Self, serde_json::Error> {
        NewJob::new(
            TYPE_SESSION_CLEANUP,
            &SessionCleanupPayload { max_age_hours },
            EnqueueOptions::default()
                .queue(QUEUE_LOW)
                .max_retry(1)
                .unique_key(TYPE_SESSION_CLEANUP.to_string()),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOptions {
    pub queue: String,
    pub max_retry: i32,
    pub timeout: Duration,
    pub process_at: Option<DateTime<Utc>>,
    pub process_in: Duration,
    pub unique_key: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: QUEUE_DEFAULT.to_string(),
            max_retry: DEFAULT_MAX_RETRY,
            timeout: Duration::seconds(DEFAULT_TIMEOUT_SECS),
            process_at: None,
            process_in: Duration::zero(),
            unique_key: None,
        }
    }
}

impl EnqueueOptions {
    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    pub fn max_retry(mut self, n: i32) -> Self {
        self.max_retry = n.max(0);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = Some(at);
        self
    }

    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = delay;
        self
    }

    pub fn unique_key(mut self, key: String) -> Self {
        self.unique_key = Some(key);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(Uuid),
    /// A job with the same unique key is already pending or active.
    Duplicate,
}

/// A job as read back from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub type_tag: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub state: JobState,
    pub max_retry: i32,
    pub retried: i32,
    pub timeout_secs: i64,
    pub process_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub unique_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// True once the current attempt is the last one allowed.
    pub fn retries_exhausted(&self) -> bool {
        self.retried >= self.max_retry
    }
}

/// Delay before retry number `retried + 1`: doubles from `base`, capped at `max`.
pub fn backoff_delay(retried: i32, base: Duration, max: Duration) -> Duration {
    let exp = retried.clamp(0, 20) as u32;
    let factor = 1i64 << exp;
    let millis = base.num_milliseconds().saturating_mul(factor);
    Duration::milliseconds(millis).min(max)
}
