//! services/api/src/worker/tag_extraction.rs
//!
//! `url:tag_extraction`: asks the model for keywords and a short summary of a
//! page and stores them on the URL row.

use async_trait::async_trait;
use mindhit_core::ai::{ChatRequest, RequestMetadata, TaskType};
use mindhit_core::jobs::{Job, UrlTagExtractionPayload};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::{JobError, JobHandler, JobResult};
use crate::service::{AiDispatcher, UrlRegistry};

pub const MAX_CONTENT_CHARS: usize = 8000;
const MAX_TOKENS: u32 = 500;

const SYSTEM_PROMPT: &str =
    "You label web pages for a personal research map. Answer with JSON only.";

#[derive(Debug, Deserialize)]
struct TagResult {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    summary: String,
}

pub struct TagExtractionHandler {
    urls: UrlRegistry,
    ai: Arc<AiDispatcher>,
}

impl TagExtractionHandler {
    pub fn new(urls: UrlRegistry, ai: Arc<AiDispatcher>) -> Self {
        Self { urls, ai }
    }
}

#[async_trait]
impl JobHandler for TagExtractionHandler {
    async fn handle(&self, job: &Job, cancel: &CancellationToken) -> JobResult {
        let payload: UrlTagExtractionPayload = job.decode()?;
        let url = self.urls.get(payload.url_id).await?;

        if url.has_keywords() {
            debug!(url_id = %url.id, "url already has keywords, skipping");
            return Ok(());
        }
        let Some(content) = url.content.as_deref().filter(|c| !c.is_empty()) else {
            warn!(url_id = %url.id, url = %url.url, "url has no content, skipping");
            return Ok(());
        };

        let mut req = ChatRequest::new(
            SYSTEM_PROMPT,
            build_prompt(url.title.as_deref().unwrap_or(""), content),
        );
        req.options.json_mode = true;
        req.options.max_tokens = Some(MAX_TOKENS);
        req.metadata = RequestMetadata::default().with_label("url_id", url.id.to_string());

        let response = self.ai.chat(TaskType::TagExtraction, req, cancel).await?;
        let result: TagResult = serde_json::from_str(&response.content)
            .map_err(|e| JobError::Fatal(format!("parse tag extraction response: {}", e)))?;

        self.urls
            .update_summary(url.id, result.summary.trim(), &result.keywords)
            .await?;
        info!(
            url_id = %url.id,
            url = %url.url,
            keywords = ?result.keywords,
            provider = %response.provider,
            tokens = response.total_tokens,
            "extracted tags"
        );
        Ok(())
    }
}

/// Cuts `content` to `MAX_CONTENT_CHARS` characters, marking the cut with "…".
pub fn truncate_content(content: &str) -> String {
    match content.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((cut, _)) => format!("{}…", &content[..cut]),
        None => content.to_string(),
    }
}

fn build_prompt(title: &str, content: &str) -> String {
    format!(
        r#"Analyze the web page and extract the following:

1. 3-5 core keywords (nouns, in the page's language)
2. A 1-2 sentence summary

Page title: {title}
Page content:
{content}

Respond in JSON format:
{{
  "keywords": ["keyword1", "keyword2", "keyword3"],
  "summary": "Page summary"
}}"#,
        title = title,
        content = truncate_content(content),
    )
}
