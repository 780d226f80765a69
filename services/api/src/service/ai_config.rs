//! services/api/src/service/ai_config.rs
//!
//! Per-task AI configuration with a process-local TTL cache.
//!
//! Readers share the lock and never block each other. Any mutation drops the
//! whole cache so the next read goes back to storage.

use mindhit_core::ai::{default_configs, AiConfig, AiConfigInput, ProviderType, TaskType};
use mindhit_core::ports::DatabaseService;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::ApiResult;
use crate::error::ApiError;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
struct ConfigCache {
    entries: HashMap<String, AiConfig>,
    loaded_at: Option<Instant>,
}

impl ConfigCache {
    fn fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.map_or(false, |at| at.elapsed() < ttl)
    }
}

pub struct AiConfigService {
    db: Arc<dyn DatabaseService>,
    ttl: Duration,
    cache: RwLock<ConfigCache>,
}

impl AiConfigService {
    pub fn new(db: Arc<dyn DatabaseService>, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            cache: RwLock::new(ConfigCache::default()),
        }
    }

    /// The enabled config for `task`, or the `default` row when the task has none.
    pub async fn config_for_task(&self, task: TaskType) -> ApiResult<AiConfig> {
        let key = task.as_str();
        {
            let cache = self.cache.read();
            if cache.fresh(self.ttl) {
                if let Some(config) = cache.entries.get(key) {
                    return Ok(config.clone());
                }
            }
        }

        let config = match self.db.find_enabled_ai_config(key).await? {
            Some(config) => config,
            None if task != TaskType::Default => {
                debug!(task = %task, "no enabled ai config, using default");
                self.db
                    .find_enabled_ai_config(TaskType::Default.as_str())
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("ai config for task {}", task)))?
            }
            None => return Err(ApiError::NotFound(format!("ai config for task {}", task))),
        };

        let mut cache = self.cache.write();
        if !cache.fresh(self.ttl) {
            cache.entries.clear();
            cache.loaded_at = Some(Instant::now());
        }
        cache.entries.insert(key.to_string(), config.clone());
        Ok(config)
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.write();
        cache.entries.clear();
        cache.loaded_at = None;
    }

    pub async fn list_all(&self) -> ApiResult<Vec<AiConfig>> {
        let mut configs = self.db.list_ai_configs().await?;
        configs.sort_by(|a, b| a.task_type.cmp(&b.task_type));
        Ok(configs)
    }

    pub async fn upsert(&self, input: AiConfigInput) -> ApiResult<AiConfig> {
        validate(&input)?;
        let config = self.db.upsert_ai_config(input).await?;
        self.invalidate();
        info!(task = %config.task_type, provider = %config.provider, "ai config updated");
        Ok(config)
    }

    pub async fn delete(&self, task_type: &str) -> ApiResult<bool> {
        let deleted = self.db.delete_ai_config(task_type).await?;
        self.invalidate();
        Ok(deleted)
    }

    /// Creates the built-in rows for tasks that have no config yet.
    pub async fn seed_defaults(&self) -> ApiResult<usize> {
        let existing: Vec<String> = self
            .db
            .list_ai_configs()
            .await?
            .into_iter()
            .map(|c| c.task_type)
            .collect();
        let mut created = 0;
        for input in default_configs() {
            if existing.contains(&input.task_type) {
                continue;
            }
            self.db.upsert_ai_config(input).await?;
            created += 1;
        }
        if created > 0 {
            self.invalidate();
            info!(created, "seeded default ai configs");
        }
        Ok(created)
    }
}

fn validate(input: &AiConfigInput) -> ApiResult<()> {
    if input.task_type.trim().is_empty() {
        return Err(ApiError::Validation("task_type is required".to_string()));
    }
    for provider in std::iter::once(&input.provider).chain(&input.fallback_providers) {
        provider.parse::<ProviderType>().map_err(ApiError::Validation)?;
    }
    if !(0.0..=2.0).contains(&input.temperature) {
        return Err(ApiError::Validation(
            "temperature must be between 0 and 2".to_string(),
        ));
    }
    if input.max_tokens < 0 || input.thinking_budget < 0 {
        return Err(ApiError::Validation(
            "token limits must not be negative".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;

    fn input(task: &str, provider: &str) -> AiConfigInput {
        AiConfigInput {
            task_type: task.into(),
            provider: provider.into(),
            model: "m".into(),
            fallback_providers: vec![],
            temperature: 0.2,
            max_tokens: 100,
            thinking_budget: 0,
            json_mode: false,
            enabled: true,
            updated_by: None,
        }
    }

    #[tokio::test]
    async fn missing_task_falls_back_to_default() {
        let store = Arc::new(MemoryStore::new());
        let configs = AiConfigService::new(store, DEFAULT_CACHE_TTL);
        configs.upsert(input("default", "openai")).await.unwrap();
        let config = configs.config_for_task(TaskType::Mindmap).await.unwrap();
        assert_eq!(config.task_type, "default");
    }

    #[tokio::test]
    async fn mutations_invalidate_the_cache() {
        let store = Arc::new(MemoryStore::new());
        let configs = AiConfigService::new(store, DEFAULT_CACHE_TTL);
        configs.upsert(input("mindmap", "openai")).await.unwrap();
        assert_eq!(
            configs.config_for_task(TaskType::Mindmap).await.unwrap().provider,
            "openai"
        );
        configs.upsert(input("mindmap", "claude")).await.unwrap();
        assert_eq!(
            configs.config_for_task(TaskType::Mindmap).await.unwrap().provider,
            "claude"
        );
    }

    #[tokio::test]
    async fn cached_reads_skip_storage() {
        let store = Arc::new(MemoryStore::new());
        let configs = AiConfigService::new(store.clone(), DEFAULT_CACHE_TTL);
        configs.upsert(input("default", "gemini")).await.unwrap();
        configs.config_for_task(TaskType::Default).await.unwrap();
        store.fail_operation("find_enabled_ai_config");
        assert!(configs.config_for_task(TaskType::Default).await.is_ok());
        configs.invalidate();
        assert!(configs.config_for_task(TaskType::Default).await.is_err());
    }

    #[tokio::test]
    async fn seeding_keeps_existing_rows() {
        let store = Arc::new(MemoryStore::new());
        let configs = AiConfigService::new(store, DEFAULT_CACHE_TTL);
        configs.upsert(input("mindmap", "gemini")).await.unwrap();
        assert_eq!(configs.seed_defaults().await.unwrap(), 2);
        assert_eq!(configs.seed_defaults().await.unwrap(), 0);
        let all = configs.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
        let mindmap = all.iter().find(|c| c.task_type == "mindmap").unwrap();
        assert_eq!(mindmap.provider, "gemini");
    }

    #[tokio::test]
    async fn unknown_providers_are_rejected() {
        let configs = AiConfigService::new(Arc::new(MemoryStore::new()), DEFAULT_CACHE_TTL);
        let err = configs.upsert(input("default", "mistral")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
