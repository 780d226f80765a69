//! services/api/src/service/ai_dispatcher.rs
//!
//! Routes an AI request to the providers configured for its task, falling back in
//! order until one succeeds. Every attempt is written to the AI log, including one
//! cut short by the caller's cancellation token.

use futures::future::join_all;
use mindhit_core::ai::{
    AiError, ChatRequest, ChatResponse, NewAiLog, ProviderType, StreamHandler, TaskType,
};
use mindhit_core::ports::{AiProvider, DatabaseService};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AiConfigService, ApiResult, UsageService};
use crate::error::ApiError;

/// One entry in the fallback order: the provider and the model it should use.
struct Attempt {
    provider: Arc<dyn AiProvider>,
    model: Option<String>,
}

pub struct AiDispatcher {
    providers: HashMap<ProviderType, Arc<dyn AiProvider>>,
    configs: Arc<AiConfigService>,
    db: Arc<dyn DatabaseService>,
    usage: Option<UsageService>,
}

impl AiDispatcher {
    pub fn new(
        providers: Vec<Arc<dyn AiProvider>>,
        configs: Arc<AiConfigService>,
        db: Arc<dyn DatabaseService>,
    ) -> Self {
        let providers: HashMap<_, _> = providers
            .into_iter()
            .map(|p| (p.provider_type(), p))
            .collect();
        if providers.is_empty() {
            warn!("no ai providers configured (missing API keys)");
        } else {
            info!(available_providers = providers.len(), "ai dispatcher initialized");
        }
        Self {
            providers,
            configs,
            db,
            usage: None,
        }
    }

    /// Refuses calls made on behalf of users who have spent their allowance.
    pub fn with_usage(mut self, usage: UsageService) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn available_providers(&self) -> Vec<ProviderType> {
        let mut types: Vec<ProviderType> = self.providers.keys().copied().collect();
        types.sort();
        types
    }

    /// Sends `req` for `task`, trying each configured provider in turn. When
    /// `cancel` fires the in-flight attempt is logged as a timeout and no
    /// fallback is tried.
    pub async fn chat(
        &self,
        task: TaskType,
        req: ChatRequest,
        cancel: &CancellationToken,
    ) -> ApiResult<ChatResponse> {
        let (req, attempts) = self.prepare(task, req).await?;
        let mut last_error = None;

        for attempt in attempts {
            if cancel.is_cancelled() {
                return Err(AiError::Cancelled.into());
            }
            let provider_type = attempt.provider.provider_type();
            let mut call = req.clone();
            call.model = attempt.model;
            debug!(provider = %provider_type, task = %task, "attempting ai request");

            let started = Instant::now();
            let result = tokio::select! {
                res = attempt.provider.chat(&call) => res,
                _ = cancel.cancelled() => Err(AiError::Cancelled),
            };
            let latency_ms = started.elapsed().as_millis() as i64;
            self.log_attempt(task, attempt.provider.as_ref(), &call, result.as_ref(), latency_ms)
                .await;

            match result {
                Ok(response) => {
                    info!(
                        provider = %response.provider,
                        model = %response.model,
                        tokens = response.total_tokens,
                        latency_ms = response.latency_ms,
                        "ai request successful"
                    );
                    return Ok(response);
                }
                Err(AiError::Cancelled) => {
                    warn!(provider = %provider_type, task = %task, latency_ms, "ai request cancelled");
                    return Err(AiError::Cancelled.into());
                }
                Err(e) => {
                    warn!(provider = %provider_type, error = %e, "ai provider failed, trying fallback");
                    last_error = Some(e);
                }
            }
        }

        Err(exhausted(task, last_error))
    }

    /// Streaming variant of `chat`. Deltas from a provider that later fails have
    /// already reached `handler`; the next provider starts a fresh stream.
    pub async fn chat_stream(
        &self,
        task: TaskType,
        req: ChatRequest,
        handler: &mut dyn StreamHandler,
        cancel: &CancellationToken,
    ) -> ApiResult<ChatResponse> {
        let (req, attempts) = self.prepare(task, req).await?;
        let mut last_error = None;

        for attempt in attempts {
            if cancel.is_cancelled() {
                return Err(AiError::Cancelled.into());
            }
            let mut call = req.clone();
            call.model = attempt.model;

            let started = Instant::now();
            let result = tokio::select! {
                res = attempt.provider.chat_stream(&call, &mut *handler) => res,
                _ = cancel.cancelled() => Err(AiError::Cancelled),
            };
            let latency_ms = started.elapsed().as_millis() as i64;
            self.log_attempt(task, attempt.provider.as_ref(), &call, result.as_ref(), latency_ms)
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(AiError::Cancelled) => return Err(AiError::Cancelled.into()),
                Err(e) => {
                    warn!(
                        provider = %attempt.provider.provider_type(),
                        error = %e,
                        "ai stream failed, trying fallback"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(exhausted(task, last_error))
    }

    /// Applies the task config, checks the caller's allowance, and builds the
    /// provider order.
    async fn prepare(&self, task: TaskType, mut req: ChatRequest) -> ApiResult<(ChatRequest, Vec<Attempt>)> {
        let config = self.configs.config_for_task(task).await?;
        config.apply_to(&mut req);

        if let (Some(usage), Some(user_id)) = (&self.usage, req.metadata.user_id) {
            match usage.ensure_within_limit(user_id).await {
                Ok(_) => {}
                Err(e @ ApiError::UsageLimitExceeded { .. }) => return Err(e),
                Err(e) => warn!(user_id = %user_id, error = %e, "failed to check usage limit"),
            }
        }

        let primary = config.provider.parse::<ProviderType>().ok();
        let attempts: Vec<Attempt> = config
            .provider_order()
            .iter()
            .filter_map(|name| name.parse::<ProviderType>().ok())
            .filter_map(|kind| {
                self.providers.get(&kind).map(|provider| Attempt {
                    provider: provider.clone(),
                    model: (Some(kind) == primary && !config.model.is_empty())
                        .then(|| config.model.clone()),
                })
            })
            .collect();

        if attempts.is_empty() {
            return Err(ApiError::AllProvidersFailed(format!(
                "no available providers for task {}",
                task
            )));
        }
        Ok((req, attempts))
    }

    async fn log_attempt(
        &self,
        task: TaskType,
        provider: &dyn AiProvider,
        req: &ChatRequest,
        outcome: Result<&ChatResponse, &AiError>,
        latency_ms: i64,
    ) {
        let model = req.model.as_deref().unwrap_or_else(|| provider.model());
        let entry = NewAiLog::from_attempt(
            task,
            provider.provider_type(),
            model,
            req,
            outcome,
            latency_ms,
        );
        if let Err(e) = self.db.insert_ai_log(entry).await {
            error!(error = %e, "failed to log ai request");
        }
    }

    /// Pings every provider concurrently.
    pub async fn health(&self) -> Vec<(ProviderType, bool)> {
        let types = self.available_providers();
        let checks = types.iter().map(|kind| {
            let provider = self.providers[kind].clone();
            async move { provider.is_healthy().await }
        });
        types.iter().copied().zip(join_all(checks).await).collect()
    }

    pub async fn close(&self) {
        for (kind, provider) in &self.providers {
            if let Err(e) = provider.close().await {
                warn!(provider = %kind, error = %e, "failed to close provider");
            }
        }
    }
}

/// Invalid JSON from the last provider stays a parse failure so jobs do not retry it.
fn exhausted(task: TaskType, last_error: Option<AiError>) -> ApiError {
    match last_error {
        Some(AiError::InvalidJson(msg)) => ApiError::InvalidJson(msg),
        Some(e) => ApiError::AllProvidersFailed(e.to_string()),
        None => ApiError::AllProvidersFailed(format!("no providers attempted for task {}", task)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::service::ai_config::DEFAULT_CACHE_TTL;
    use async_trait::async_trait;
    use mindhit_core::ai::{AiConfigInput, AiLogStatus};
    use mindhit_core::domain::{NewTokenUsage, UsageOperation};
    use mindhit_core::ports::UsageRepository;
    use mindhit_core::usage::FREE_TOKEN_LIMIT;
    use parking_lot::Mutex;

    struct Scripted {
        kind: ProviderType,
        reply: Result<&'static str, AiError>,
        seen_models: Mutex<Vec<Option<String>>>,
    }

    impl Scripted {
        fn new(kind: ProviderType, reply: Result<&'static str, AiError>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                reply,
                seen_models: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AiProvider for Scripted {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, AiError> {
            self.seen_models.lock().push(req.model.clone());
            let content = self.reply.clone()?;
            Ok(ChatResponse {
                thinking: String::new(),
                content: content.to_string(),
                input_tokens: 10,
                output_tokens: 5,
                thinking_tokens: 0,
                total_tokens: 15,
                provider: self.kind,
                model: req.model.clone().unwrap_or_else(|| "boot-model".into()),
                latency_ms: 1,
                request_id: None,
            })
        }

        async fn chat_stream(
            &self,
            req: &ChatRequest,
            handler: &mut dyn StreamHandler,
        ) -> Result<ChatResponse, AiError> {
            let response = self.chat(req).await?;
            handler.on_content(&response.content);
            handler.on_done(&response);
            Ok(response)
        }

        fn provider_type(&self) -> ProviderType {
            self.kind
        }

        fn model(&self) -> &str {
            "boot-model"
        }

        async fn is_healthy(&self) -> bool {
            self.reply.is_ok()
        }
    }

    /// Never answers; only cancellation ends a call.
    struct Stalled;

    #[async_trait]
    impl AiProvider for Stalled {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, AiError> {
            std::future::pending().await
        }

        async fn chat_stream(
            &self,
            _req: &ChatRequest,
            _handler: &mut dyn StreamHandler,
        ) -> Result<ChatResponse, AiError> {
            std::future::pending().await
        }

        fn provider_type(&self) -> ProviderType {
            ProviderType::OpenAi
        }

        fn model(&self) -> &str {
            "stalled-model"
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }

    async fn dispatcher(
        store: Arc<MemoryStore>,
        providers: Vec<Arc<dyn AiProvider>>,
    ) -> AiDispatcher {
        let configs = Arc::new(AiConfigService::new(store.clone(), DEFAULT_CACHE_TTL));
        configs
            .upsert(AiConfigInput {
                task_type: "default".into(),
                provider: "openai".into(),
                model: "gpt-custom".into(),
                fallback_providers: vec!["gemini".into(), "claude".into()],
                temperature: 0.3,
                max_tokens: 256,
                thinking_budget: 0,
                json_mode: false,
                enabled: true,
                updated_by: None,
            })
            .await
            .unwrap();
        AiDispatcher::new(providers, configs, store)
    }

    #[tokio::test]
    async fn primary_model_override_applies_only_to_primary() {
        let store = Arc::new(MemoryStore::new());
        let openai = Scripted::new(ProviderType::OpenAi, Err(AiError::Request("down".into())));
        let gemini = Scripted::new(ProviderType::Gemini, Ok("hello"));
        let ai = dispatcher(store.clone(), vec![openai.clone(), gemini.clone()]).await;

        let response = ai
            .chat(TaskType::Default, ChatRequest::new("s", "u"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.provider, ProviderType::Gemini);
        assert_eq!(openai.seen_models.lock().clone(), vec![Some("gpt-custom".to_string())]);
        assert_eq!(gemini.seen_models.lock().clone(), vec![None]);

        let logs = store.ai_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].entry.status, AiLogStatus::Error);
        assert_eq!(logs[1].entry.model, "boot-model");
    }

    #[tokio::test]
    async fn unavailable_providers_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let claude = Scripted::new(ProviderType::Claude, Ok("{}"));
        let ai = dispatcher(store.clone(), vec![claude]).await;
        let response = ai
            .chat(TaskType::Default, ChatRequest::new("s", "u"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.provider, ProviderType::Claude);
        assert_eq!(store.ai_logs().len(), 1);
    }

    #[tokio::test]
    async fn invalid_json_from_the_last_provider_is_not_retryable() {
        let store = Arc::new(MemoryStore::new());
        let openai = Scripted::new(ProviderType::OpenAi, Err(AiError::InvalidJson("eof".into())));
        let ai = dispatcher(store, vec![openai]).await;
        let err = ai
            .chat(TaskType::Default, ChatRequest::new("s", "u"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidJson(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn no_providers_is_a_retryable_failure() {
        let store = Arc::new(MemoryStore::new());
        let ai = dispatcher(store, vec![]).await;
        let err = ai
            .chat(TaskType::Default, ChatRequest::new("s", "u"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AllProvidersFailed(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn spent_allowance_refuses_the_call() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user();
        let openai = Scripted::new(ProviderType::OpenAi, Ok("hi"));
        let ai = dispatcher(store.clone(), vec![openai.clone()])
            .await
            .with_usage(UsageService::new(store.clone()));

        let mut req = ChatRequest::new("s", "u");
        req.metadata.user_id = Some(user);
        store
            .insert_token_usage(NewTokenUsage {
                user_id: user,
                session_id: None,
                operation: UsageOperation::Mindmap,
                tokens_used: FREE_TOKEN_LIMIT,
                ai_model: None,
                period_start: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let err = ai
            .chat(TaskType::Default, req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UsageLimitExceeded { .. }));
        assert!(openai.seen_models.lock().is_empty());
    }

    #[tokio::test]
    async fn health_reports_each_provider() {
        let store = Arc::new(MemoryStore::new());
        let ai = dispatcher(
            store,
            vec![
                Scripted::new(ProviderType::Claude, Ok("ok")),
                Scripted::new(ProviderType::OpenAi, Err(AiError::NoResponse)),
            ],
        )
        .await;
        assert_eq!(
            ai.health().await,
            vec![(ProviderType::OpenAi, false), (ProviderType::Claude, true)]
        );
    }

    #[tokio::test]
    async fn cancelled_attempt_is_logged_and_stops_fallback() {
        let store = Arc::new(MemoryStore::new());
        let gemini = Scripted::new(ProviderType::Gemini, Ok("late"));
        let ai = dispatcher(store.clone(), vec![Arc::new(Stalled), gemini.clone()]).await;

        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            deadline.cancel();
        });

        let err = ai
            .chat(TaskType::Default, ChatRequest::new("s", "u"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(gemini.seen_models.lock().is_empty());

        let logs = store.ai_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].entry.status, AiLogStatus::Timeout);
        assert_eq!(logs[0].entry.provider, "openai");
        assert_eq!(logs[0].entry.model, "gpt-custom");
    }

    #[tokio::test]
    async fn already_cancelled_token_makes_no_attempt() {
        let store = Arc::new(MemoryStore::new());
        let openai = Scripted::new(ProviderType::OpenAi, Ok("hi"));
        let ai = dispatcher(store.clone(), vec![openai.clone()]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ai
            .chat(TaskType::Default, ChatRequest::new("s", "u"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AllProvidersFailed(_)));
        assert!(openai.seen_models.lock().is_empty());
        assert!(store.ai_logs().is_empty());
    }
}
