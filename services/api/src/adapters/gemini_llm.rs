//! services/api/src/adapters/gemini_llm.rs
//!
//! Google Gemini over its REST API. Implements the `AiProvider` port.

use async_trait::async_trait;
use futures::StreamExt;
use mindhit_core::ai::{
    validate_json, AiError, ChatRequest, ChatResponse, ProviderType, Role, StreamHandler,
};
use mindhit_core::ports::AiProvider;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::sse;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
    include_thoughts: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i64,
    #[serde(default)]
    candidates_token_count: i64,
    #[serde(default)]
    thoughts_token_count: i64,
    #[serde(default)]
    total_token_count: i64,
}

impl GenerateContentResponse {
    /// Splits the first candidate's parts into (thinking, content).
    fn texts(&self) -> (String, String) {
        let mut thinking = String::new();
        let mut content = String::new();
        if let Some(candidate) = self.candidates.first() {
            for part in &candidate.content.parts {
                if let Some(text) = &part.text {
                    if part.thought {
                        thinking.push_str(text);
                    } else {
                        content.push_str(text);
                    }
                }
            }
        }
        (thinking, content)
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct GeminiChatAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiChatAdapter {
    pub fn new(http: reqwest::Client, api_key: String, model: String) -> Self {
        Self { http, api_key, model }
    }

    fn build_body(req: &ChatRequest) -> GenerateContentRequest {
        let opts = &req.options;
        let mut system_instruction = None;
        let mut contents = Vec::new();
        for message in req.build_messages() {
            let part = Part {
                text: Some(message.content),
                thought: false,
            };
            match message.role {
                Role::System => {
                    system_instruction = Some(Content {
                        role: None,
                        parts: vec![part],
                    })
                }
                Role::User => contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![part],
                }),
                Role::Assistant => contents.push(Content {
                    role: Some("model".to_string()),
                    parts: vec![part],
                }),
            }
        }

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: opts.temperature,
                max_output_tokens: opts.max_tokens,
                top_p: opts.top_p,
                stop_sequences: opts.stop.clone(),
                response_mime_type: opts.json_mode.then_some("application/json"),
                thinking_config: (opts.enable_thinking && opts.thinking_budget > 0).then(|| {
                    ThinkingConfig {
                        thinking_budget: opts.thinking_budget,
                        include_thoughts: true,
                    }
                }),
            },
        }
    }

    async fn post(&self, req: &ChatRequest, method: &str) -> Result<reqwest::Response, AiError> {
        let model = req.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/models/{}:{}", BASE_URL, model, method);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_body(req))
            .send()
            .await
            .map_err(|e| AiError::Request(format!("gemini: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Request(format!("gemini returned {}: {}", status, body)));
        }
        Ok(response)
    }

    #[allow(clippy::too_many_arguments)]
    fn to_response(
        &self,
        req: &ChatRequest,
        thinking: String,
        content: String,
        usage: UsageMetadata,
        model_version: Option<String>,
        request_id: Option<String>,
        started: Instant,
    ) -> ChatResponse {
        ChatResponse {
            thinking,
            content,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            thinking_tokens: usage.thoughts_token_count,
            total_tokens: usage.total_token_count,
            provider: ProviderType::Gemini,
            model: model_version
                .or_else(|| req.model.clone())
                .unwrap_or_else(|| self.model.clone()),
            latency_ms: started.elapsed().as_millis() as i64,
            request_id,
        }
        .normalized()
    }
}

//=========================================================================================
// `AiProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AiProvider for GeminiChatAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, AiError> {
        let started = Instant::now();
        let body: GenerateContentResponse = self
            .post(req, "generateContent")
            .await?
            .json()
            .await
            .map_err(|e| AiError::Request(format!("gemini: malformed response: {}", e)))?;

        let (thinking, content) = body.texts();
        if content.is_empty() {
            return Err(AiError::NoResponse);
        }
        if req.options.json_mode {
            validate_json(&content)?;
        }
        let usage = body.usage_metadata.unwrap_or_default();
        Ok(self.to_response(
            req,
            thinking,
            content,
            usage,
            body.model_version,
            body.response_id,
            started,
        ))
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        handler: &mut dyn StreamHandler,
    ) -> Result<ChatResponse, AiError> {
        let started = Instant::now();
        let response = match self.post(req, "streamGenerateContent?alt=sse").await {
            Ok(response) => response,
            Err(err) => {
                handler.on_error(&err);
                return Err(err);
            }
        };

        let mut thinking = String::new();
        let mut content = String::new();
        let mut usage = UsageMetadata::default();
        let mut model_version = None;
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
            let chunk: GenerateContentResponse = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!(error = %e, "skipping unparseable gemini stream chunk");
                    continue;
                }
            };
            let (thinking_delta, content_delta) = chunk.texts();
            if !thinking_delta.is_empty() {
                thinking.push_str(&thinking_delta);
                handler.on_thinking(&thinking_delta);
            }
            if !content_delta.is_empty() {
                content.push_str(&content_delta);
                handler.on_content(&content_delta);
            }
            if let Some(u) = chunk.usage_metadata {
                usage = u;
            }
            if chunk.model_version.is_some() {
                model_version = chunk.model_version;
            }
            if chunk.response_id.is_some() {
                request_id = chunk.response_id;
            }
        }

        if content.is_empty() {
            let err = AiError::NoResponse;
            handler.on_error(&err);
            return Err(err);
        }
        if req.options.json_mode {
            if let Err(err) = validate_json(&content) {
                handler.on_error(&err);
                return Err(err);
            }
        }

        let response =
            self.to_response(req, thinking, content, usage, model_version, request_id, started);
        handler.on_done(&response);
        Ok(response)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
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
                debug!(error = %e, "gemini health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindhit_core::ai::Message;

    #[test]
    fn body_maps_roles_and_options() {
        let mut req = ChatRequest::new("be brief", "hello");
        req.messages.push(Message::new(Role::Assistant, "earlier"));
        req.options.json_mode = true;
        req.options.enable_thinking = true;
        req.options.thinking_budget = 512;
        req.options.max_tokens = Some(100);

        let body = serde_json::to_value(GeminiChatAdapter::build_body(&req)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][1]["role"], "user");
        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["maxOutputTokens"], 100);
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], 512);
        assert!(config.get("stopSequences").is_none());
    }

    #[test]
    fn thought_parts_are_separated() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[
            {"text":"pondering","thought":true},{"text":"{\"a\":1}"}]}}],
            "usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":3,"totalTokenCount":10},
            "modelVersion":"gemini-2.0-flash","responseId":"r1"}"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let (thinking, content) = resp.texts();
        assert_eq!(thinking, "pondering");
        assert_eq!(content, r#"{"a":1}"#);
        assert_eq!(resp.usage_metadata.unwrap().total_token_count, 10);
    }
}
