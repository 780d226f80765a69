//! services/api/src/service/mod.rs
//!
//! Application services. Each one owns a slice of the business rules and talks to
//! storage only through the core ports, so the same code runs over Postgres and
//! over the in-memory store.

pub mod ai_config;
pub mod ai_dispatcher;
pub mod events;
pub mod mindmaps;
pub mod sessions;
pub mod url_registry;
pub mod usage;

pub use ai_config::AiConfigService;
pub use ai_dispatcher::AiDispatcher;
pub use events::{EventService, IngestSummary};
pub use mindmaps::MindmapService;
pub use sessions::SessionService;
pub use url_registry::UrlRegistry;
pub use usage::UsageService;

use mindhit_core::jobs::NewJob;

use crate::error::ApiError;

/// A convenience type alias for `Result<T, ApiError>`.
pub type ApiResult<T> = Result<T, ApiError>;

/// Job constructors only fail if their payload cannot be serialised.
pub(crate) fn build_job(job: Result<NewJob, serde_json::Error>) -> ApiResult<NewJob> {
    job.map_err(|e| ApiError::Internal(format!("failed to encode job payload: {}", e)))
}
