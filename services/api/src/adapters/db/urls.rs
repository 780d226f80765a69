//! services/api/src/adapters/db/urls.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindhit_core::domain::{NewUrl, Url};
use mindhit_core::ports::{PortError, PortResult, UrlRepository};
use sqlx::FromRow;
use uuid::Uuid;

use super::{not_found_or_unexpected, unexpected, DbAdapter};

const URL_COLUMNS: &str =
    "id, url, url_hash, title, content, summary, keywords, crawled_at, created_at, updated_at";

#[derive(FromRow)]
struct UrlRecord {
    id: Uuid,
    url: String,
    url_hash: String,
    title: Option<String>,
    content: Option<String>,
    summary: Option<String>,
    keywords: Vec<String>,
    crawled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UrlRecord {
    fn to_domain(self) -> Url {
        Url {
            id: self.id,
            url: self.url,
            url_hash: self.url_hash,
            title: self.title,
            content: self.content,
            summary: self.summary,
            keywords: self.keywords,
            crawled_at: self.crawled_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[async_trait]
impl UrlRepository for DbAdapter {
    async fn find_url(&self, url_id: Uuid) -> PortResult<Option<Url>> {
        let record = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {} FROM urls WHERE id = $1",
            URL_COLUMNS
        ))
        .bind(url_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(UrlRecord::to_domain))
    }

    async fn find_url_by_hash(&self, url_hash: &str) -> PortResult<Option<Url>> {
        let record = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {} FROM urls WHERE url_hash = $1",
            URL_COLUMNS
        ))
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(UrlRecord::to_domain))
    }

    async fn insert_url_if_absent(&self, url: NewUrl) -> PortResult<(Url, bool)> {
        let inserted = sqlx::query_as::<_, UrlRecord>(&format!(
            "INSERT INTO urls (id, url, url_hash, title, content) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (url_hash) DO NOTHING RETURNING {}",
            URL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&url.url)
        .bind(&url.url_hash)
        .bind(&url.title)
        .bind(&url.content)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        if let Some(record) = inserted {
            return Ok((record.to_domain(), true));
        }

        // Lost the race to a concurrent insert of the same address.
        let existing = self
            .find_url_by_hash(&url.url_hash)
            .await?
            .ok_or_else(|| {
                PortError::Unexpected(format!(
                    "url with hash {} conflicted on insert but could not be read back",
                    url.url_hash
                ))
            })?;
        Ok((existing, false))
    }

    async fn fill_url_content(&self, url_id: Uuid, content: &str) -> PortResult<Url> {
        let updated = sqlx::query_as::<_, UrlRecord>(&format!(
            "UPDATE urls SET content = $2, updated_at = now() \
             WHERE id = $1 AND (content IS NULL OR content = '') RETURNING {}",
            URL_COLUMNS
        ))
        .bind(url_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match updated {
            Some(record) => Ok(record.to_domain()),
            None => self
                .find_url(url_id)
                .await?
                .ok_or_else(|| PortError::NotFound(format!("url {}", url_id))),
        }
    }

    async fn update_url_summary(
        &self,
        url_id: Uuid,
        summary: &str,
        keywords: &[String],
    ) -> PortResult<Url> {
        let record = sqlx::query_as::<_, UrlRecord>(&format!(
            "UPDATE urls SET summary = $2, keywords = $3, crawled_at = now(), updated_at = now() \
             WHERE id = $1 RETURNING {}",
            URL_COLUMNS
        ))
        .bind(url_id)
        .bind(summary)
        .bind(keywords)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, || format!("url {}", url_id)))?;

        Ok(record.to_domain())
    }

    async fn list_urls_without_summary(&self, limit: i64) -> PortResult<Vec<Url>> {
        let records = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {} FROM urls \
             WHERE (summary IS NULL OR summary = '') AND content IS NOT NULL AND content <> '' \
             ORDER BY created_at ASC LIMIT $1",
            URL_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(UrlRecord::to_domain).collect())
    }
}
