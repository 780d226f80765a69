//! services/api/src/queue/mod.rs
//!
//! The job bus: a client for enqueueing, a server that runs registered handlers
//! with retries and a dead set, and a periodic scheduler.
//!
//! Delivery is at least once. Handlers must tolerate seeing the same job twice.

pub mod client;
pub mod scheduler;
pub mod server;

pub use client::JobClient;
pub use scheduler::Scheduler;
pub use server::{JobServer, ServerConfig};

use async_trait::async_trait;
use mindhit_core::jobs::Job;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// Why a handler gave up on an attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    /// The bus retries with backoff until `max_retry` is spent.
    #[error("{0}")]
    Retryable(String),
    /// Sent straight to the dead set.
    #[error("{0}")]
    Fatal(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable(_))
    }
}

impl From<ApiError> for JobError {
    fn from(e: ApiError) -> Self {
        if e.is_transient() {
            JobError::Retryable(e.to_string())
        } else {
            JobError::Fatal(e.to_string())
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Fatal(format!("invalid payload: {}", e))
    }
}

pub type JobResult = Result<(), JobError>;

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs one attempt. `cancel` fires on timeout or when shutdown gives up
    /// waiting.
    async fn handle(&self, job: &Job, cancel: &CancellationToken) -> JobResult;

    /// Called once the job has been moved to the dead set.
    async fn on_dead(&self, _job: &Job, _error: &str) {}
}

/// Maps job type tags to their handlers.
#[derive(Clone, Default)]
pub struct JobRouter {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, type_tag: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(type_tag.to_string(), handler);
        self
    }

    pub fn get(&self, type_tag: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(type_tag).cloned()
    }

    pub fn type_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _job: &Job, _cancel: &CancellationToken) -> JobResult {
            Ok(())
        }
    }

    #[test]
    fn api_errors_split_by_transience() {
        assert!(JobError::from(ApiError::Storage("timeout".into())).is_retryable());
        assert!(!JobError::from(ApiError::InvalidJson("eof".into())).is_retryable());
        assert!(!JobError::from(ApiError::NotFound("url".into())).is_retryable());
    }

    #[test]
    fn router_lists_registered_types() {
        let router = JobRouter::new()
            .register("b:job", Arc::new(Noop))
            .register("a:job", Arc::new(Noop));
        assert_eq!(router.type_tags(), vec!["a:job", "b:job"]);
        assert!(router.get("c:job").is_none());
    }
}
