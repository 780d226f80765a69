//! services/api/src/worker/mindmap.rs
//!
//! `mindmap:generate`: turns a stopped session into a relationship graph and
//! commits it together with the session's move to `completed`.

use async_trait::async_trait;
use chrono::Utc;
use mindhit_core::ai::{ChatRequest, RequestMetadata, TaskType};
use mindhit_core::domain::{CommitOutcome, NewTokenUsage, SessionDetails, UsageOperation};
use mindhit_core::jobs::{Job, MindmapGeneratePayload};
use mindhit_core::mindmap::{build_galaxy, RelationshipGraphResponse};
use mindhit_core::ports::DatabaseService;
use mindhit_core::SessionStatus;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::{JobError, JobHandler, JobResult};
use crate::service::{AiDispatcher, UsageService};

const MAX_TOKENS: u32 = 4096;
const NO_HIGHLIGHTS: &str = "(No highlights)";

const SYSTEM_PROMPT: &str =
    "You organise a user's browsing session into a relationship graph. Answer with JSON only.";

pub struct MindmapHandler {
    db: Arc<dyn DatabaseService>,
    ai: Arc<AiDispatcher>,
    usage: UsageService,
}

impl MindmapHandler {
    pub fn new(db: Arc<dyn DatabaseService>, ai: Arc<AiDispatcher>, usage: UsageService) -> Self {
        Self { db, ai, usage }
    }
}

#[async_trait]
impl JobHandler for MindmapHandler {
    async fn handle(&self, job: &Job, cancel: &CancellationToken) -> JobResult {
        let payload: MindmapGeneratePayload = job.decode()?;
        let session_id = payload.session_id;

        let Some(details) = self.db.load_session_details(session_id).await.map_err(retryable)?
        else {
            info!(session_id = %session_id, "session no longer exists, skipping mindmap");
            return Ok(());
        };
        if details.session.session_status != SessionStatus::Processing {
            info!(
                session_id = %session_id,
                status = %details.session.session_status,
                "session is not processing, skipping mindmap"
            );
            return Ok(());
        }
        let user_id = details.session.user_id;

        let context = SessionContext::from_details(&details);
        self.db
            .mark_mindmap_running(session_id)
            .await
            .map_err(retryable)?;
        info!(
            session_id = %session_id,
            pages = details.page_visits.len(),
            highlights = details.highlights.len(),
            "generating mindmap"
        );

        let mut req = ChatRequest::new(SYSTEM_PROMPT, context.prompt());
        req.options.json_mode = true;
        req.options.max_tokens = Some(MAX_TOKENS);
        req.metadata = RequestMetadata {
            user_id: Some(user_id),
            session_id: Some(session_id),
            ..Default::default()
        };

        let response = self.ai.chat(TaskType::Mindmap, req, cancel).await?;
        let graph: RelationshipGraphResponse = serde_json::from_str(&response.content)
            .map_err(|e| JobError::Fatal(format!("parse mindmap response: {}", e)))?;
        let data = build_galaxy(&graph, &context.durations);

        let period_start = match self.usage.period_start(user_id).await {
            Ok(start) => start,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "billing period unknown, using now");
                Utc::now()
            }
        };
        let usage = NewTokenUsage {
            user_id,
            session_id: Some(session_id),
            operation: UsageOperation::Mindmap,
            tokens_used: response.total_tokens,
            ai_model: Some(response.model.clone()),
            period_start,
        };

        if cancel.is_cancelled() {
            return Err(JobError::Retryable("job cancelled".to_string()));
        }
        match self
            .db
            .commit_mindmap(session_id, &data, Some(usage))
            .await
            .map_err(retryable)?
        {
            CommitOutcome::Committed(mindmap) => info!(
                session_id = %session_id,
                version = mindmap.version,
                topics = graph.topics.len(),
                connections = graph.connections.len(),
                provider = %response.provider,
                tokens = response.total_tokens,
                "mindmap generated"
            ),
            CommitOutcome::SessionNotProcessing => info!(
                session_id = %session_id,
                "session left processing before commit, mindmap discarded"
            ),
        }
        Ok(())
    }

    async fn on_dead(&self, job: &Job, error: &str) {
        let Ok(payload) = job.decode::<MindmapGeneratePayload>() else {
            return;
        };
        match self.db.fail_mindmap(payload.session_id, error).await {
            Ok(true) => warn!(session_id = %payload.session_id, error, "mindmap failed, session marked failed"),
            Ok(false) => info!(session_id = %payload.session_id, "session was not processing, nothing to fail"),
            Err(e) => error!(session_id = %payload.session_id, error = %e, "failed to record mindmap failure"),
        }
    }
}

fn retryable(e: mindhit_core::ports::PortError) -> JobError {
    JobError::Retryable(e.to_string())
}

/// What the model sees about a session, plus the dwell time per URL for layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub pages: String,
    pub highlights: String,
    /// Summed visit durations keyed by url id.
    pub durations: HashMap<String, i64>,
}

impl SessionContext {
    pub fn from_details(details: &SessionDetails) -> Self {
        let mut pages = String::new();
        let mut durations: HashMap<String, i64> = HashMap::new();

        for pv in &details.page_visits {
            let url_id = pv.url.id.to_string();
            let duration_ms = pv.visit.duration_ms.unwrap_or(0);
            if let Some(ms) = pv.visit.duration_ms {
                *durations.entry(url_id.clone()).or_default() += ms;
            }
            let _ = write!(
                pages,
                "\n- ID: {}\n  Title: {}\n  URL: {}\n  Keywords: [{}]\n  Summary: {}\n  Duration: {}ms\n",
                url_id,
                pv.url.title.as_deref().unwrap_or(""),
                pv.url.url,
                pv.url.keywords.join(", "),
                pv.url.summary.as_deref().unwrap_or(""),
                duration_ms,
            );
        }

        let highlights = if details.highlights.is_empty() {
            NO_HIGHLIGHTS.to_string()
        } else {
            details
                .highlights
                .iter()
                .map(|h| format!("- \"{}\"\n", h.text))
                .collect()
        };

        Self {
            pages,
            highlights,
            durations,
        }
    }

    pub fn prompt(&self) -> String {
        format!(
            r#"Analyze the pages and tags from this browsing session to create a relationship graph.

## Session Data

### Visited Pages (URL + keywords + summary)

{pages}

### Highlights (user-selected text)

{highlights}

## Requirements

1. **Core theme (core)**: One central theme spanning the entire session
2. **Main topics (topics)**: 3-5 groups based on common keywords
3. **Page connections**: Map pages to their relevant topics
4. **Topic connections**: Relationships between topics with overlapping keywords

## Respond in JSON format

{{
  "core": {{
    "label": "Core theme",
    "description": "Session summary (1-2 sentences)"
  }},
  "topics": [
    {{
      "id": "topic-1",
      "label": "Topic name",
      "keywords": ["related", "keywords"],
      "description": "Topic description",
      "pages": [
        {{
          "url_id": "uuid",
          "title": "Page title",
          "relevance": 0.9
        }}
      ]
    }}
  ],
  "connections": [
    {{
      "from": "topic-1",
      "to": "topic-2",
      "shared_keywords": ["shared keyword"],
      "reason": "Connection reason"
    }}
  ]
}}"#,
            pages = self.pages,
            highlights = self.highlights,
        )
    }
}
