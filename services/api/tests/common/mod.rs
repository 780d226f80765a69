//! Shared fixtures for the integration tests: an in-memory backend, scripted AI
//! providers and a oneshot HTTP client.

#![allow(dead_code)]

use api_lib::adapters::MemoryStore;
use api_lib::queue::{JobServer, ServerConfig};
use api_lib::service::ai_config::DEFAULT_CACHE_TTL;
use api_lib::service::{AiConfigService, AiDispatcher, UsageService};
use api_lib::web::{build_router, AppState};
use api_lib::worker::{build_router as build_job_router, WorkerDeps};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use mindhit_core::ai::{AiConfigInput, AiError, ChatRequest, ChatResponse, ProviderType, StreamHandler};
use mindhit_core::ports::AiProvider;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

pub const CORE_ONLY_GRAPH: &str =
    r#"{"core":{"label":"X","description":"y"},"topics":[],"connections":[]}"#;

/// A provider that answers every request with the same scripted result.
pub struct Scripted {
    kind: ProviderType,
    reply: Mutex<Result<String, AiError>>,
    delay: Mutex<Option<Duration>>,
    pub calls: Mutex<usize>,
}

impl Scripted {
    pub fn ok(kind: ProviderType, content: &str) -> Arc<Self> {
        Self::with(kind, Ok(content.to_string()))
    }

    pub fn failing(kind: ProviderType, error: AiError) -> Arc<Self> {
        Self::with(kind, Err(error))
    }

    fn with(kind: ProviderType, reply: Result<String, AiError>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply: Mutex::new(reply),
            delay: Mutex::new(None),
            calls: Mutex::new(0),
        })
    }

    pub fn set_reply(&self, reply: Result<String, AiError>) {
        *self.reply.lock() = reply;
    }

    /// Every later call waits this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl AiProvider for Scripted {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, AiError> {
        *self.calls.lock() += 1;
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.reply.lock().clone()?;
        Ok(ChatResponse {
            thinking: String::new(),
            content,
            input_tokens: 120,
            output_tokens: 30,
            thinking_tokens: 0,
            total_tokens: 150,
            provider: self.kind,
            model: req.model.clone().unwrap_or_else(|| self.kind.default_model().to_string()),
            latency_ms: 3,
            request_id: Some(format!("req-{}", self.kind.as_str())),
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
        self.kind.default_model()
    }

    async fn is_healthy(&self) -> bool {
        self.reply.lock().is_ok()
    }
}

/// The API router over a fresh in-memory store.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(store.clone(), store.clone()));
        let router = build_router(state, Duration::from_secs(5));
        Self { store, router }
    }

    /// Seeds a user and returns `(user_id, bearer token)`.
    pub fn user(&self) -> (Uuid, String) {
        let user = self.store.seed_user();
        let token = self.store.issue_token(user, chrono::Duration::hours(1));
        (user, token)
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Starts a session over HTTP and returns its id.
    pub async fn start_session(&self, token: &str) -> Uuid {
        let (status, body) = self
            .send(Method::POST, "/v1/sessions/start", Some(token), None)
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["session"]["id"].as_str().unwrap().parse().unwrap()
    }
}

/// Worker side of the system over the same store.
pub struct TestWorker {
    pub ai: Arc<AiDispatcher>,
    pub configs: Arc<AiConfigService>,
    pub server: JobServer,
}

impl TestWorker {
    /// Seeds the default AI configuration and wires every handler. Retries are
    /// due immediately so `drain_due` runs a job to completion or burial.
    pub async fn new(store: Arc<MemoryStore>, providers: Vec<Arc<dyn AiProvider>>) -> Self {
        let configs = Arc::new(AiConfigService::new(store.clone(), DEFAULT_CACHE_TTL));
        configs.seed_defaults().await.unwrap();
        let ai = Arc::new(
            AiDispatcher::new(providers, configs.clone(), store.clone())
                .with_usage(UsageService::new(store.clone())),
        );
        let deps = WorkerDeps::new(store.clone(), ai.clone());
        let config = ServerConfig {
            retry_base_delay: chrono::Duration::zero(),
            retry_max_delay: chrono::Duration::zero(),
            ..ServerConfig::default()
        };
        let server = JobServer::new(store, build_job_router(&deps), config);
        Self { ai, configs, server }
    }

    pub async fn set_config(&self, task: &str, provider: &str, fallbacks: &[&str]) {
        self.configs
            .upsert(AiConfigInput {
                task_type: task.to_string(),
                provider: provider.to_string(),
                model: String::new(),
                fallback_providers: fallbacks.iter().map(|f| f.to_string()).collect(),
                temperature: 0.5,
                max_tokens: 4096,
                thinking_budget: 0,
                json_mode: true,
                enabled: true,
                updated_by: None,
            })
            .await
            .unwrap();
    }
}
