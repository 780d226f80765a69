//! services/api/src/adapters/claude_llm.rs
//!
//! Anthropic Claude over the Messages API. Implements the `AiProvider` port.
//!
//! Claude has no JSON response mode, so in JSON mode the reply may arrive wrapped
//! in a Markdown code fence; one surrounding fence is stripped before validation.

use async_trait::async_trait;
use futures::StreamExt;
use lazy_static::lazy_static;
use mindhit_core::ai::{
    validate_json, AiError, ChatRequest, ChatResponse, ProviderType, Role, StreamHandler,
};
use mindhit_core::ports::AiProvider;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::sse;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// The API rejects thinking budgets below this.
const MIN_THINKING_BUDGET: u32 = 1024;

lazy_static! {
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n(.*?)\n?\s*```\s*$").expect("valid fence regex");
}

/// Returns the body of a single surrounding Markdown code fence, or the input.
pub fn strip_code_fence(content: &str) -> &str {
    CODE_FENCE
        .captures(content)
        .and_then(|c| c.get(1))
        .map_or(content, |m| m.as_str())
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "no_stops")]
    stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingParam>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

fn no_stops(stops: &&[String]) -> bool {
    stops.is_empty()
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ThinkingParam {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct Usage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart { message: StreamStart },
    ContentBlockDelta { delta: Delta },
    MessageDelta {
        #[serde(default)]
        usage: Option<Usage>,
    },
    Error { error: StreamError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamStart {
    id: String,
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct ClaudeChatAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl ClaudeChatAdapter {
    pub fn new(http: reqwest::Client, api_key: String, model: String) -> Self {
        Self { http, api_key, model }
    }

    fn build_body<'a>(&'a self, req: &'a ChatRequest, stream: bool) -> MessagesRequest<'a> {
        let opts = &req.options;
        let messages = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage {
                role: if m.role == Role::Assistant { "assistant" } else { "user" },
                content: m.content.as_str(),
            })
            .chain(
                req.user_prompt
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(|p| WireMessage { role: "user", content: p }),
            )
            .collect();

        let mut max_tokens = opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let thinking = (opts.enable_thinking && opts.thinking_budget > 0).then(|| {
            let budget = opts.thinking_budget.max(MIN_THINKING_BUDGET);
            max_tokens = max_tokens.max(budget + MIN_THINKING_BUDGET);
            ThinkingParam {
                kind: "enabled",
                budget_tokens: budget,
            }
        });

        MessagesRequest {
            model: req.model.as_deref().unwrap_or(&self.model),
            max_tokens,
            messages,
            system: req.system_prompt.as_deref().filter(|s| !s.is_empty()),
            // Extended thinking only accepts the default temperature.
            temperature: if thinking.is_some() { None } else { opts.temperature },
            top_p: if thinking.is_some() { None } else { opts.top_p },
            stop_sequences: &opts.stop,
            thinking,
            stream,
        }
    }

    async fn post(&self, req: &ChatRequest, stream: bool) -> Result<reqwest::Response, AiError> {
        let response = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.build_body(req, stream))
            .send()
            .await
            .map_err(|e| AiError::Request(format!("claude: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Request(format!("claude returned {}: {}", status, body)));
        }
        Ok(response)
    }
}

/// Unwraps a fenced reply and validates it when JSON was requested.
fn finish_content(req: &ChatRequest, content: String) -> Result<String, AiError> {
    if !req.options.json_mode {
        return Ok(content);
    }
    let stripped = strip_code_fence(&content).to_string();
    validate_json(&stripped)?;
    Ok(stripped)
}

//=========================================================================================
// `AiProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AiProvider for ClaudeChatAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, AiError> {
        let started = Instant::now();
        let body: MessagesResponse = self
            .post(req, false)
            .await?
            .json()
            .await
            .map_err(|e| AiError::Request(format!("claude: malformed response: {}", e)))?;

        let mut thinking = String::new();
        let mut content = String::new();
        for block in body.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::Thinking { thinking: t } => thinking.push_str(&t),
                ContentBlock::Other => {}
            }
        }
        if content.is_empty() {
            return Err(AiError::NoResponse);
        }
        let content = finish_content(req, content)?;

        Ok(ChatResponse {
            thinking,
            content,
            input_tokens: body.usage.input_tokens,
            output_tokens: body.usage.output_tokens,
            // Thinking tokens are billed inside output_tokens.
            thinking_tokens: 0,
            total_tokens: body.usage.input_tokens + body.usage.output_tokens,
            provider: ProviderType::Claude,
            model: body.model,
            latency_ms: started.elapsed().as_millis() as i64,
            request_id: Some(body.id),
        }
        .normalized())
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        handler: &mut dyn StreamHandler,
    ) -> Result<ChatResponse, AiError> {
        let started = Instant::now();
        let response = match self.post(req, true).await {
            Ok(response) => response,
            Err(err) => {
                handler.on_error(&err);
                return Err(err);
            }
        };

        let mut thinking = String::new();
        let mut content = String::new();
        let mut usage = Usage::default();
        let mut model = req.model.clone().unwrap_or_else(|| self.model.clone());
        let mut request_id = None;

        let lines = sse::data_lines(response);
        futures::pin_mut!(lines);
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    handler.on_error(&err);
                    return Err(err);
                }
            };
            let event: StreamEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "skipping unparseable claude stream event");
                    continue;
                }
            };
            match event {
                StreamEvent::MessageStart { message } => {
                    request_id = Some(message.id);
                    model = message.model;
                    usage.input_tokens = message.usage.input_tokens;
                }
                StreamEvent::ContentBlockDelta { delta } => match delta {
                    Delta::TextDelta { text } => {
                        content.push_str(&text);
                        handler.on_content(&text);
                    }
                    Delta::ThinkingDelta { thinking: t } => {
                        thinking.push_str(&t);
                        handler.on_thinking(&t);
                    }
                    Delta::Other => {}
                },
                StreamEvent::MessageDelta { usage: Some(u) } => {
                    usage.output_tokens = u.output_tokens;
                }
                StreamEvent::Error { error } => {
                    let err = AiError::Request(format!("claude stream error: {}", error.message));
                    handler.on_error(&err);
                    return Err(err);
                }
                StreamEvent::MessageDelta { usage: None } | StreamEvent::Other => {}
            }
        }

        if content.is_empty() {
            let err = AiError::NoResponse;
            handler.on_error(&err);
            return Err(err);
        }
        let content = match finish_content(req, content) {
            Ok(content) => content,
            Err(err) => {
                handler.on_error(&err);
                return Err(err);
            }
        };

        let response = ChatResponse {
            thinking,
            content,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            thinking_tokens: 0,
            total_tokens: usage.input_tokens + usage.output_tokens,
            provider: ProviderType::Claude,
            model,
            latency_ms: started.elapsed().as_millis() as i64,
            request_id,
        }
        .normalized();
        handler.on_done(&response);
        Ok(response)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Claude
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_healthy(&self) -> bool {
        let mut ping = ChatRequest::new("", "ping");
        ping.options.max_tokens = Some(5);
        match self.chat(&ping).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "claude health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindhit_core::ai::Message;

    fn adapter() -> ClaudeChatAdapter {
        ClaudeChatAdapter::new(reqwest::Client::new(), "k".into(), "claude-test".into())
    }

    #[test]
    fn strips_one_surrounding_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  ```\n[1]\n```  "), "[1]");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("see ```json\n{}\n```"), "see ```json\n{}\n```");
    }

    #[test]
    fn fenced_prose_is_still_invalid_json() {
        let mut req = ChatRequest::new("s", "u");
        req.options.json_mode = true;
        let err = finish_content(&req, "```\nnot json\n```".into()).unwrap_err();
        assert!(matches!(err, AiError::InvalidJson(_)));
        assert_eq!(finish_content(&req, "```json\n{}\n```".into()).unwrap(), "{}");
    }

    #[test]
    fn thinking_drops_temperature_and_raises_max_tokens() {
        let claude = adapter();
        let mut req = ChatRequest::new("system", "question");
        req.messages.push(Message::new(Role::Assistant, "before"));
        req.options.temperature = Some(0.5);
        req.options.max_tokens = Some(2000);
        req.options.enable_thinking = true;
        req.options.thinking_budget = 10_000;

        let body = serde_json::to_value(claude.build_body(&req, false)).unwrap();
        assert_eq!(body["system"], "system");
        assert_eq!(body["messages"][0]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"], "question");
        assert!(body.get("temperature").is_none());
        assert_eq!(body["thinking"]["budget_tokens"], 10_000);
        assert_eq!(body["max_tokens"], 11_024);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn stream_events_decode() {
        let start: StreamEvent = serde_json::from_str(
            r#"{"type":"message_start","message":{"id":"m1","model":"claude-x","usage":{"input_tokens":9}}}"#,
        )
        .unwrap();
        assert!(matches!(start, StreamEvent::MessageStart { .. }));
        let delta: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { .. } }
        ));
        let ping: StreamEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, StreamEvent::Other));
    }
}
