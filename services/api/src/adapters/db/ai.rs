//! services/api/src/adapters/db/ai.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindhit_core::ai::{AiConfig, AiConfigInput, AiLog, AiLogStatus, NewAiLog};
use mindhit_core::ports::{AiRepository, PortResult};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::{corrupt, unexpected, DbAdapter};

const CONFIG_COLUMNS: &str = "id, task_type, provider, model, fallback_providers, temperature, \
    max_tokens, thinking_budget, json_mode, enabled, updated_by, created_at, updated_at";

const LOG_COLUMNS: &str = "id, user_id, session_id, task_type, provider, model, system_prompt, \
    user_prompt, thinking, content, input_tokens, output_tokens, thinking_tokens, total_tokens, \
    latency_ms, request_id, status, error_message, estimated_cost_cents, metadata, created_at";

#[derive(FromRow)]
struct AiConfigRecord {
    id: Uuid,
    task_type: String,
    provider: String,
    model: String,
    fallback_providers: Vec<String>,
    temperature: f64,
    max_tokens: i32,
    thinking_budget: i32,
    json_mode: bool,
    enabled: bool,
    updated_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AiConfigRecord {
    fn to_domain(self) -> AiConfig {
        AiConfig {
            id: self.id,
            task_type: self.task_type,
            provider: self.provider,
            model: self.model,
            fallback_providers: self.fallback_providers,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            thinking_budget: self.thinking_budget,
            json_mode: self.json_mode,
            enabled: self.enabled,
            updated_by: self.updated_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AiLogRecord {
    id: Uuid,
    user_id: Option<Uuid>,
    session_id: Option<Uuid>,
    task_type: String,
    provider: String,
    model: String,
    system_prompt: Option<String>,
    user_prompt: Option<String>,
    thinking: Option<String>,
    content: Option<String>,
    input_tokens: i64,
    output_tokens: i64,
    thinking_tokens: i64,
    total_tokens: i64,
    latency_ms: i64,
    request_id: Option<String>,
    status: String,
    error_message: Option<String>,
    estimated_cost_cents: i64,
    metadata: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl AiLogRecord {
    fn to_domain(self) -> PortResult<AiLog> {
        Ok(AiLog {
            id: self.id,
            entry: NewAiLog {
                user_id: self.user_id,
                session_id: self.session_id,
                task_type: self.task_type,
                provider: self.provider,
                model: self.model,
                system_prompt: self.system_prompt,
                user_prompt: self.user_prompt,
                thinking: self.thinking,
                content: self.content,
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
                thinking_tokens: self.thinking_tokens,
                total_tokens: self.total_tokens,
                latency_ms: self.latency_ms,
                request_id: self.request_id,
                status: self
                    .status
                    .parse::<AiLogStatus>()
                    .map_err(|e| corrupt("ai_logs.status", e))?,
                error_message: self.error_message,
                estimated_cost_cents: self.estimated_cost_cents,
                metadata: self.metadata.0,
            },
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl AiRepository for DbAdapter {
    async fn find_enabled_ai_config(&self, task_type: &str) -> PortResult<Option<AiConfig>> {
        let record = sqlx::query_as::<_, AiConfigRecord>(&format!(
            "SELECT {} FROM ai_configs WHERE task_type = $1 AND enabled = true",
            CONFIG_COLUMNS
        ))
        .bind(task_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(AiConfigRecord::to_domain))
    }

    async fn list_ai_configs(&self) -> PortResult<Vec<AiConfig>> {
        let records = sqlx::query_as::<_, AiConfigRecord>(&format!(
            "SELECT {} FROM ai_configs ORDER BY task_type",
            CONFIG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(AiConfigRecord::to_domain).collect())
    }

    async fn upsert_ai_config(&self, input: AiConfigInput) -> PortResult<AiConfig> {
        let record = sqlx::query_as::<_, AiConfigRecord>(&format!(
            "INSERT INTO ai_configs (id, task_type, provider, model, fallback_providers, temperature, \
             max_tokens, thinking_budget, json_mode, enabled, updated_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (task_type) DO UPDATE SET provider = EXCLUDED.provider, \
             model = EXCLUDED.model, fallback_providers = EXCLUDED.fallback_providers, \
             temperature = EXCLUDED.temperature, max_tokens = EXCLUDED.max_tokens, \
             thinking_budget = EXCLUDED.thinking_budget, json_mode = EXCLUDED.json_mode, \
             enabled = EXCLUDED.enabled, updated_by = EXCLUDED.updated_by, updated_at = now() \
             RETURNING {}",
            CONFIG_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.task_type)
        .bind(&input.provider)
        .bind(&input.model)
        .bind(&input.fallback_providers)
        .bind(input.temperature)
        .bind(input.max_tokens)
        .bind(input.thinking_budget)
        .bind(input.json_mode)
        .bind(input.enabled)
        .bind(input.updated_by)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.to_domain())
    }

    async fn delete_ai_config(&self, task_type: &str) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM ai_configs WHERE task_type = $1")
            .bind(task_type)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_ai_log(&self, log: NewAiLog) -> PortResult<AiLog> {
        let record = sqlx::query_as::<_, AiLogRecord>(&format!(
            "INSERT INTO ai_logs (id, user_id, session_id, task_type, provider, model, system_prompt, \
             user_prompt, thinking, content, input_tokens, output_tokens, thinking_tokens, \
             total_tokens, latency_ms, request_id, status, error_message, estimated_cost_cents, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             RETURNING {}",
            LOG_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(log.user_id)
        .bind(log.session_id)
        .bind(&log.task_type)
        .bind(&log.provider)
        .bind(&log.model)
        .bind(&log.system_prompt)
        .bind(&log.user_prompt)
        .bind(&log.thinking)
        .bind(&log.content)
        .bind(log.input_tokens)
        .bind(log.output_tokens)
        .bind(log.thinking_tokens)
        .bind(log.total_tokens)
        .bind(log.latency_ms)
        .bind(&log.request_id)
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .bind(log.estimated_cost_cents)
        .bind(Json(&log.metadata))
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        record.to_domain()
    }

    async fn list_ai_logs_for_session(&self, session_id: Uuid) -> PortResult<Vec<AiLog>> {
        let records = sqlx::query_as::<_, AiLogRecord>(&format!(
            "SELECT {} FROM ai_logs WHERE session_id = $1 ORDER BY created_at ASC",
            LOG_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(AiLogRecord::to_domain).collect()
    }
}
