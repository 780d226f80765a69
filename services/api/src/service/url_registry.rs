//! services/api/src/service/url_registry.rs
//!
//! The URL registry maps raw addresses onto shared, content-addressed rows.

use mindhit_core::domain::{NewUrl, Url};
use mindhit_core::ports::DatabaseService;
use mindhit_core::url_norm;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::ApiResult;
use crate::error::ApiError;

#[derive(Clone)]
pub struct UrlRegistry {
    db: Arc<dyn DatabaseService>,
}

impl UrlRegistry {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Returns the row for `raw_url`, creating it on first sight.
    ///
    /// An existing row only ever gains content it did not have; a stored title or
    /// content is never overwritten. Concurrent callers for the same address all
    /// resolve to one row through the unique hash.
    pub async fn get_or_create(
        &self,
        raw_url: &str,
        title: Option<&str>,
        content: Option<&str>,
    ) -> ApiResult<Url> {
        let normalized = url_norm::normalize(raw_url);
        let url_hash = url_norm::hash_normalized(&normalized);
        let content = content.filter(|c| !c.is_empty());

        let existing = match self.db.find_url_by_hash(&url_hash).await? {
            Some(url) => url,
            None => {
                let (url, created) = self
                    .db
                    .insert_url_if_absent(NewUrl {
                        url: normalized,
                        url_hash,
                        title: title.filter(|t| !t.is_empty()).map(str::to_string),
                        content: content.map(str::to_string),
                    })
                    .await?;
                if created {
                    debug!(url_id = %url.id, url = %url.url, "registered new url");
                    return Ok(url);
                }
                url
            }
        };

        match content {
            Some(content) if !existing.has_content() => {
                Ok(self.db.fill_url_content(existing.id, content).await?)
            }
            _ => Ok(existing),
        }
    }

    pub async fn get(&self, url_id: Uuid) -> ApiResult<Url> {
        self.db
            .find_url(url_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("url {}", url_id)))
    }

    /// Overwrites both fields; running it twice with the same input is a no-op.
    pub async fn update_summary(
        &self,
        url_id: Uuid,
        summary: &str,
        keywords: &[String],
    ) -> ApiResult<Url> {
        Ok(self.db.update_url_summary(url_id, summary, keywords).await?)
    }

    pub async fn list_without_summary(&self, limit: i64) -> ApiResult<Vec<Url>> {
        Ok(self.db.list_urls_without_summary(limit).await?)
    }
}
