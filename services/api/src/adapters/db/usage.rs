//! services/api/src/adapters/db/usage.rs
//!
//! Token accounting, billing lookups, and access-token validation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindhit_core::domain::{NewTokenUsage, TokenUsage, UsageOperation};
use mindhit_core::ports::{AuthRepository, PortError, PortResult, UsageRepository};
use mindhit_core::usage::{ActiveSubscription, BillingAccount};
use sqlx::FromRow;
use uuid::Uuid;

use super::{corrupt, unexpected, DbAdapter};

#[derive(FromRow)]
struct TokenUsageRecord {
    id: Uuid,
    user_id: Uuid,
    session_id: Option<Uuid>,
    operation: String,
    tokens_used: i64,
    ai_model: Option<String>,
    period_start: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TokenUsageRecord {
    fn to_domain(self) -> PortResult<TokenUsage> {
        Ok(TokenUsage {
            id: self.id,
            user_id: self.user_id,
            session_id: self.session_id,
            operation: self
                .operation
                .parse::<UsageOperation>()
                .map_err(|e| corrupt("token_usage.operation", e))?,
            tokens_used: self.tokens_used,
            ai_model: self.ai_model,
            period_start: self.period_start,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct SubscriptionRecord {
    current_period_start: DateTime<Utc>,
    token_limit: Option<i64>,
}

/// Inserts a usage row on any executor, so the mindmap commit can share its
/// transaction.
pub(super) async fn insert_usage<'e, E>(
    executor: E,
    usage: &NewTokenUsage,
) -> PortResult<TokenUsage>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, TokenUsageRecord>(
        "INSERT INTO token_usage (id, user_id, session_id, operation, tokens_used, ai_model, period_start) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING id, user_id, session_id, operation, tokens_used, ai_model, period_start, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(usage.user_id)
    .bind(usage.session_id)
    .bind(usage.operation.as_str())
    .bind(usage.tokens_used)
    .bind(&usage.ai_model)
    .bind(usage.period_start)
    .fetch_one(executor)
    .await
    .map_err(unexpected)?
    .to_domain()
}

#[async_trait]
impl UsageRepository for DbAdapter {
    async fn billing_account(&self, user_id: Uuid) -> PortResult<Option<BillingAccount>> {
        let signup_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT created_at FROM users WHERE id = $1 AND status = 'active'")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        let Some(signup_at) = signup_at else {
            return Ok(None);
        };

        let subscription = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT s.current_period_start, p.token_limit \
             FROM subscriptions s JOIN plans p ON p.id = s.plan_id \
             WHERE s.user_id = $1 AND s.status = 'active' \
             ORDER BY s.current_period_start DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(Some(BillingAccount {
            signup_at,
            subscription: subscription.map(|s| ActiveSubscription {
                current_period_start: s.current_period_start,
                token_limit: s.token_limit,
            }),
        }))
    }

    async fn insert_token_usage(&self, usage: NewTokenUsage) -> PortResult<TokenUsage> {
        insert_usage(&self.pool, &usage).await
    }

    async fn sum_tokens_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(tokens_used), 0)::BIGINT FROM token_usage \
             WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)
    }
}

#[async_trait]
impl AuthRepository for DbAdapter {
    async fn validate_auth_session(&self, token: &str) -> PortResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT a.user_id FROM auth_sessions a JOIN users u ON u.id = a.user_id \
             WHERE a.id = $1 AND a.expires_at > now() AND u.status = 'active'",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        user_id.ok_or(PortError::Unauthorized)
    }
}
