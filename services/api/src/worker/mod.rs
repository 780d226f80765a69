//! services/api/src/worker/mod.rs
//!
//! Job handlers run by the `worker` binary.

pub mod mindmap;
pub mod sessions;
pub mod tag_extraction;

pub use mindmap::MindmapHandler;
pub use sessions::{CleanupHandler, SessionProcessHandler};
pub use tag_extraction::TagExtractionHandler;

use mindhit_core::jobs::{
    EnqueueOutcome, TYPE_MINDMAP_GENERATE, TYPE_SESSION_CLEANUP, TYPE_SESSION_PROCESS,
    TYPE_URL_TAG_EXTRACTION,
};
use mindhit_core::ports::DatabaseService;
use std::sync::Arc;
use tracing::{info, warn};

use crate::queue::{JobClient, JobRouter};
use crate::service::{AiDispatcher, ApiResult, UrlRegistry, UsageService};

/// How many unsummarised URLs are queued at worker boot.
pub const BACKFILL_LIMIT: i64 = 100;

/// Everything the handlers need.
#[derive(Clone)]
pub struct WorkerDeps {
    pub db: Arc<dyn DatabaseService>,
    pub ai: Arc<AiDispatcher>,
    pub urls: UrlRegistry,
    pub usage: UsageService,
}

impl WorkerDeps {
    pub fn new(db: Arc<dyn DatabaseService>, ai: Arc<AiDispatcher>) -> Self {
        Self {
            urls: UrlRegistry::new(db.clone()),
            usage: UsageService::new(db.clone()),
            db,
            ai,
        }
    }
}

/// Registers one handler per job type.
pub fn build_router(deps: &WorkerDeps) -> JobRouter {
    JobRouter::new()
        .register(TYPE_SESSION_PROCESS, Arc::new(SessionProcessHandler))
        .register(TYPE_SESSION_CLEANUP, Arc::new(CleanupHandler::new(deps.db.clone())))
        .register(
            TYPE_URL_TAG_EXTRACTION,
            Arc::new(TagExtractionHandler::new(deps.urls.clone(), deps.ai.clone())),
        )
        .register(
            TYPE_MINDMAP_GENERATE,
            Arc::new(MindmapHandler::new(
                deps.db.clone(),
                deps.ai.clone(),
                deps.usage.clone(),
            )),
        )
}

/// Queues tag extraction for URLs that have content but no summary yet.
/// Returns how many new jobs were written.
pub async fn backfill_summaries(
    urls: &UrlRegistry,
    client: &JobClient,
    limit: i64,
) -> ApiResult<usize> {
    let pending = urls.list_without_summary(limit).await?;
    let mut queued = 0;
    for url in &pending {
        match client.enqueue_tag_extraction(url.id).await {
            Ok(EnqueueOutcome::Enqueued(_)) => queued += 1,
            Ok(EnqueueOutcome::Duplicate) => {}
            Err(e) => warn!(url_id = %url.id, error = %e, "failed to queue backfill"),
        }
    }
    info!(found = pending.len(), queued, "url summary backfill queued");
    Ok(queued)
}
