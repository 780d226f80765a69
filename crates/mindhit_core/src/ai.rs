//! crates/mindhit_core/src/ai.rs
//!
//! Provider-neutral AI request and response records, per-task configuration,
//! call logs, and cost estimation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Providers and Tasks
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    Gemini,
    Claude,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::Gemini => "gemini",
            ProviderType::Claude => "claude",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "gpt-4o",
            ProviderType::Gemini => "gemini-2.0-flash",
            ProviderType::Claude => "claude-sonnet-4-20250514",
        }
    }

    /// Cents per million (input, output) tokens.
    fn rates(&self) -> (i64, i64) {
        match self {
            ProviderType::OpenAi => (250, 1000),
            ProviderType::Claude => (300, 1500),
            ProviderType::Gemini => (35, 105),
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderType::OpenAi),
            "gemini" => Ok(ProviderType::Gemini),
            "claude" => Ok(ProviderType::Claude),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Estimated cost of a call in integer cents. The summed cost is rounded down
/// once.
pub fn estimate_cost_cents(provider: ProviderType, input_tokens: i64, output_tokens: i64) -> i64 {
    let (input_rate, output_rate) = provider.rates();
    (input_tokens * input_rate + output_tokens * output_rate) / 1_000_000
}

/// The logical purpose of an AI call; selects an `AiConfig` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Default,
    TagExtraction,
    Mindmap,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Default => "default",
            TaskType::TagExtraction => "tag_extraction",
            TaskType::Mindmap => "mindmap",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Requests and Responses
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub stop: Vec<String>,
    pub enable_thinking: bool,
    pub thinking_budget: u32,
    pub json_mode: bool,
}

/// Attribution carried into logs and usage accounting.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestMetadata {
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub labels: BTreeMap<String, String>,
}

impl RequestMetadata {
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.labels {
            map.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub options: ChatOptions,
    pub metadata: RequestMetadata,
    /// Overrides the provider's boot-time model.
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            user_prompt: Some(user_prompt.into()),
            ..Default::default()
        }
    }

    /// The full conversation: system prompt, prior turns, then the user prompt.
    pub fn build_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 2);
        if let Some(system) = self.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            out.push(Message::new(Role::System, system));
        }
        out.extend(self.messages.iter().cloned());
        if let Some(user) = self.user_prompt.as_deref().filter(|s| !s.is_empty()) {
            out.push(Message::new(Role::User, user));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub thinking: String,
    pub content: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub thinking_tokens: i64,
    pub total_tokens: i64,
    pub provider: ProviderType,
    pub model: String,
    pub latency_ms: i64,
    pub request_id: Option<String>,
}

impl ChatResponse {
    /// Raises `total_tokens` so it never undercounts input plus output.
    pub fn normalized(mut self) -> Self {
        self.total_tokens = self.total_tokens.max(self.input_tokens + self.output_tokens);
        self
    }
}

/// Receives incremental output from a streaming call.
pub trait StreamHandler: Send {
    fn on_thinking(&mut self, _delta: &str) {}
    fn on_content(&mut self, _delta: &str) {}
    fn on_done(&mut self, _response: &ChatResponse) {}
    fn on_error(&mut self, _error: &AiError) {}
}

/// A handler that only accumulates content.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    pub thinking: String,
    pub content: String,
    pub done: bool,
}

impl StreamHandler for CollectingHandler {
    fn on_thinking(&mut self, delta: &str) {
        self.thinking.push_str(delta);
    }

    fn on_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    fn on_done(&mut self, _response: &ChatResponse) {
        self.done = true;
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AiError {
    #[error("provider is not configured: {0}")]
    NotConfigured(String),
    #[error("provider returned no response")]
    NoResponse,
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("request was cancelled")]
    Cancelled,
}

/// Rejects content that is not a JSON document.
pub fn validate_json(content: &str) -> Result<(), AiError> {
    serde_json::from_str::<serde_json::Value>(content)
        .map(|_| ())
        .map_err(|e| AiError::InvalidJson(e.to_string()))
}

//=========================================================================================
// Per-task Configuration
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub id: Uuid,
    pub task_type: String,
    pub provider: String,
    pub model: String,
    pub fallback_providers: Vec<String>,
    pub temperature: f64,
    pub max_tokens: i32,
    pub thinking_budget: i32,
    pub json_mode: bool,
    pub enabled: bool,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AiConfig {
    /// Applies the configured generation options to a request.
    pub fn apply_to(&self, req: &mut ChatRequest) {
        req.options.temperature = Some(self.temperature);
        if self.max_tokens > 0 {
            req.options.max_tokens = Some(self.max_tokens as u32);
        }
        if self.json_mode {
            req.options.json_mode = true;
        }
        if self.thinking_budget > 0 {
            req.options.enable_thinking = true;
            req.options.thinking_budget = self.thinking_budget as u32;
        }
    }

    /// Primary first, then fallbacks, each provider at most once.
    pub fn provider_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::with_capacity(1 + self.fallback_providers.len());
        for p in std::iter::once(&self.provider).chain(self.fallback_providers.iter()) {
            if !order.iter().any(|seen| seen == p) {
                order.push(p.clone());
            }
        }
        order
    }
}

/// Fields an administrator can set on an `AiConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct AiConfigInput {
    pub task_type: String,
    pub provider: String,
    pub model: String,
    pub fallback_providers: Vec<String>,
    pub temperature: f64,
    pub max_tokens: i32,
    pub thinking_budget: i32,
    pub json_mode: bool,
    pub enabled: bool,
    pub updated_by: Option<Uuid>,
}

/// Rows created on first boot when no configuration exists for a task.
pub fn default_configs() -> Vec<AiConfigInput> {
    vec![
        AiConfigInput {
            task_type: TaskType::Default.as_str().to_string(),
            provider: ProviderType::OpenAi.as_str().to_string(),
            model: ProviderType::OpenAi.default_model().to_string(),
            fallback_providers: vec!["gemini".into(), "claude".into()],
            temperature: 0.7,
            max_tokens: 4096,
            thinking_budget: 0,
            json_mode: false,
            enabled: true,
            updated_by: None,
        },
        AiConfigInput {
            task_type: TaskType::TagExtraction.as_str().to_string(),
            provider: ProviderType::Gemini.as_str().to_string(),
            model: ProviderType::Gemini.default_model().to_string(),
            fallback_providers: vec!["openai".into()],
            temperature: 0.3,
            max_tokens: 1024,
            thinking_budget: 0,
            json_mode: true,
            enabled: true,
            updated_by: None,
        },
        AiConfigInput {
            task_type: TaskType::Mindmap.as_str().to_string(),
            provider: ProviderType::Claude.as_str().to_string(),
            model: ProviderType::Claude.default_model().to_string(),
            fallback_providers: vec!["openai".into()],
            temperature: 0.5,
            max_tokens: 8192,
            thinking_budget: 10_000,
            json_mode: true,
            enabled: true,
            updated_by: None,
        },
    ]
}

//=========================================================================================
// Call Logs
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiLogStatus {
    Success,
    Error,
    /// The caller gave up before the provider answered.
    Timeout,
}

impl AiLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiLogStatus::Success => "success",
            AiLogStatus::Error => "error",
            AiLogStatus::Timeout => "timeout",
        }
    }
}

impl FromStr for AiLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AiLogStatus::Success),
            "error" => Ok(AiLogStatus::Error),
            "timeout" => Ok(AiLogStatus::Timeout),
            other => Err(format!("unknown log status '{}'", other)),
        }
    }
}

/// One provider attempt, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAiLog {
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub task_type: String,
    pub provider: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub thinking: Option<String>,
    pub content: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub thinking_tokens: i64,
    pub total_tokens: i64,
    pub latency_ms: i64,
    pub request_id: Option<String>,
    pub status: AiLogStatus,
    pub error_message: Option<String>,
    pub estimated_cost_cents: i64,
    pub metadata: serde_json::Value,
}

impl NewAiLog {
    /// Builds the log entry for one attempt. An attempt abandoned through
    /// cancellation is logged as a timeout.
    pub fn from_attempt(
        task: TaskType,
        provider: ProviderType,
        model: &str,
        req: &ChatRequest,
        outcome: Result<&ChatResponse, &AiError>,
        latency_ms: i64,
    ) -> Self {
        let mut log = NewAiLog {
            user_id: req.metadata.user_id,
            session_id: req.metadata.session_id,
            task_type: task.as_str().to_string(),
            provider: provider.as_str().to_string(),
            model: model.to_string(),
            system_prompt: req.system_prompt.clone(),
            user_prompt: req.user_prompt.clone(),
            thinking: None,
            content: None,
            input_tokens: 0,
            output_tokens: 0,
            thinking_tokens: 0,
            total_tokens: 0,
            latency_ms,
            request_id: None,
            status: AiLogStatus::Success,
            error_message: None,
            estimated_cost_cents: 0,
            metadata: req.metadata.to_json(),
        };
        match outcome {
            Ok(resp) => {
                log.model = resp.model.clone();
                log.thinking = Some(resp.thinking.clone()).filter(|t| !t.is_empty());
                log.content = Some(resp.content.clone());
                log.input_tokens = resp.input_tokens;
                log.output_tokens = resp.output_tokens;
                log.thinking_tokens = resp.thinking_tokens;
                log.total_tokens = resp.total_tokens;
                log.request_id = resp.request_id.clone();
                log.estimated_cost_cents =
                    estimate_cost_cents(provider, resp.input_tokens, resp.output_tokens);
            }
            Err(e) => {
                log.status = match e {
                    AiError::Cancelled => AiLogStatus::Timeout,
                    _ => AiLogStatus::Error,
                };
                log.error_message = Some(e.to_string());
            }
        }
        log
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiLog {
    pub id: Uuid,
    pub entry: NewAiLog,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_rounds_the_sum_down_once() {
        assert_eq!(estimate_cost_cents(ProviderType::OpenAi, 1_000_000, 1_000_000), 1250);
        // Half a cent from each side adds up to one.
        assert_eq!(estimate_cost_cents(ProviderType::OpenAi, 2_000, 500), 1);
        assert_eq!(estimate_cost_cents(ProviderType::Claude, 999_999, 0), 299);
        assert_eq!(estimate_cost_cents(ProviderType::Gemini, 1_000, 1_000), 0);
        assert_eq!(estimate_cost_cents(ProviderType::Gemini, 2_000_000, 1_000_000), 175);
    }

    #[test]
    fn messages_wrap_history_with_prompts() {
        let mut req = ChatRequest::new("sys", "question");
        req.messages.push(Message::new(Role::Assistant, "earlier"));
        let messages = req.build_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "earlier");
        assert_eq!(messages[2], Message::new(Role::User, "question"));
    }

    #[test]
    fn empty_prompts_are_skipped() {
        let req = ChatRequest {
            system_prompt: Some(String::new()),
            user_prompt: Some("hi".into()),
            ..Default::default()
        };
        assert_eq!(req.build_messages(), vec![Message::new(Role::User, "hi")]);
    }

    #[test]
    fn config_enables_thinking_only_with_budget() {
        let base = default_configs().remove(0);
        let mut cfg = AiConfig {
            id: Uuid::new_v4(),
            task_type: base.task_type,
            provider: base.provider,
            model: base.model,
            fallback_providers: base.fallback_providers,
            temperature: base.temperature,
            max_tokens: base.max_tokens,
            thinking_budget: 0,
            json_mode: false,
            enabled: true,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut req = ChatRequest::default();
        cfg.apply_to(&mut req);
        assert!(!req.options.enable_thinking);
        assert_eq!(req.options.max_tokens, Some(4096));

        cfg.thinking_budget = 2048;
        cfg.json_mode = true;
        cfg.apply_to(&mut req);
        assert!(req.options.enable_thinking);
        assert_eq!(req.options.thinking_budget, 2048);
        assert!(req.options.json_mode);
    }

    #[test]
    fn provider_order_deduplicates() {
        let cfg = AiConfig {
            id: Uuid::new_v4(),
            task_type: "default".into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            fallback_providers: vec!["gemini".into(), "openai".into(), "gemini".into()],
            temperature: 0.7,
            max_tokens: 0,
            thinking_budget: 0,
            json_mode: false,
            enabled: true,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(cfg.provider_order(), vec!["openai", "gemini"]);
    }

    #[test]
    fn failed_attempt_is_logged_as_error() {
        let req = ChatRequest::new("s", "u");
        let log = NewAiLog::from_attempt(
            TaskType::Mindmap,
            ProviderType::Claude,
            "claude-x",
            &req,
            Err(&AiError::Request("boom".into())),
            12,
        );
        assert_eq!(log.status, AiLogStatus::Error);
        assert_eq!(log.error_message.as_deref(), Some("provider request failed: boom"));
        assert_eq!(log.estimated_cost_cents, 0);
    }

    #[test]
    fn cancelled_attempt_is_logged_as_timeout() {
        let req = ChatRequest::new("s", "u");
        let log = NewAiLog::from_attempt(
            TaskType::TagExtraction,
            ProviderType::OpenAi,
            "gpt-x",
            &req,
            Err(&AiError::Cancelled),
            30_000,
        );
        assert_eq!(log.status, AiLogStatus::Timeout);
        assert_eq!(log.status.as_str(), "timeout");
        assert_eq!("timeout".parse::<AiLogStatus>(), Ok(AiLogStatus::Timeout));
        assert_eq!(log.latency_ms, 30_000);
    }

    #[test]
    fn total_tokens_never_undercounts() {
        let resp = ChatResponse {
            thinking: String::new(),
            content: "{}".into(),
            input_tokens: 10,
            output_tokens: 5,
            thinking_tokens: 0,
            total_tokens: 3,
            provider: ProviderType::OpenAi,
            model: "m".into(),
            latency_ms: 0,
            request_id: None,
        }
        .normalized();
        assert_eq!(resp.total_tokens, 15);
    }

    #[test]
    fn validate_json_rejects_prose() {
        assert!(validate_json(r#"{"keywords":[]}"#).is_ok());
        assert!(matches!(validate_json("Sure! Here you go"), Err(AiError::InvalidJson(_))));
    }
}
