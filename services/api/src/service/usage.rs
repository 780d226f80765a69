//! services/api/src/service/usage.rs
//!
//! Token metering against the caller's billing period.

use chrono::{DateTime, Utc};
use mindhit_core::domain::{NewTokenUsage, TokenUsage};
use mindhit_core::ports::DatabaseService;
use mindhit_core::usage::LimitStatus;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::ApiResult;
use crate::error::ApiError;

#[derive(Clone)]
pub struct UsageService {
    db: Arc<dyn DatabaseService>,
}

impl UsageService {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn check_limit(&self, user_id: Uuid) -> ApiResult<LimitStatus> {
        let account = self
            .db
            .billing_account(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("user {}", user_id)))?;
        let period_start = account.period_start(Utc::now());
        let tokens_used = self.db.sum_tokens_since(user_id, period_start).await?;
        Ok(LimitStatus {
            tokens_used,
            token_limit: account.token_limit(),
            period_start,
        })
    }

    /// Fails with `UsageLimitExceeded` once the period allowance is spent.
    pub async fn ensure_within_limit(&self, user_id: Uuid) -> ApiResult<LimitStatus> {
        let status = self.check_limit(user_id).await?;
        match status.token_limit {
            Some(limit) if !status.can_use_ai() => {
                warn!(
                    user_id = %user_id,
                    tokens_used = status.tokens_used,
                    token_limit = limit,
                    "token limit reached"
                );
                Err(ApiError::UsageLimitExceeded {
                    used: status.tokens_used,
                    limit,
                })
            }
            _ => Ok(status),
        }
    }

    pub async fn period_start(&self, user_id: Uuid) -> ApiResult<DateTime<Utc>> {
        Ok(self.check_limit(user_id).await?.period_start)
    }

    pub async fn record(&self, usage: NewTokenUsage) -> ApiResult<TokenUsage> {
        Ok(self.db.insert_token_usage(usage).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use chrono::Duration;
    use mindhit_core::domain::UsageOperation;
    use mindhit_core::usage::{ActiveSubscription, FREE_TOKEN_LIMIT};

    fn usage_row(user_id: Uuid, tokens: i64, period_start: DateTime<Utc>) -> NewTokenUsage {
        NewTokenUsage {
            user_id,
            session_id: None,
            operation: UsageOperation::Mindmap,
            tokens_used: tokens,
            ai_model: Some("m".into()),
            period_start,
        }
    }

    #[tokio::test]
    async fn free_users_are_capped() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user();
        let usage = UsageService::new(store);

        let status = usage.ensure_within_limit(user).await.unwrap();
        assert_eq!(status.token_limit, Some(FREE_TOKEN_LIMIT));
        usage
            .record(usage_row(user, FREE_TOKEN_LIMIT, status.period_start))
            .await
            .unwrap();

        let err = usage.ensure_within_limit(user).await.unwrap_err();
        assert!(matches!(err, ApiError::UsageLimitExceeded { used, .. } if used == FREE_TOKEN_LIMIT));
    }

    #[tokio::test]
    async fn unlimited_plans_are_never_refused() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user();
        let start = Utc::now() - Duration::days(2);
        store.set_subscription(
            user,
            ActiveSubscription {
                current_period_start: start,
                token_limit: None,
            },
        );
        let usage = UsageService::new(store);
        usage.record(usage_row(user, 10_000_000, start)).await.unwrap();
        let status = usage.ensure_within_limit(user).await.unwrap();
        assert!(status.is_unlimited());
        assert_eq!(status.period_start, start);
    }

    #[tokio::test]
    async fn free_period_rolls_from_signup() {
        let signup = Utc::now() - Duration::days(45);
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user_at(signup);
        let usage = UsageService::new(store);
        assert_eq!(usage.period_start(user).await.unwrap(), signup + Duration::days(30));
    }

    #[tokio::test]
    async fn unknown_users_are_not_found() {
        let usage = UsageService::new(Arc::new(MemoryStore::new()));
        let err = usage.check_limit(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
