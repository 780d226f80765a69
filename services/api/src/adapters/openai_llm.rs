//! services/api/src/adapters/openai_llm.rs
//!
//! This module contains the adapter for OpenAI chat completions.
//! It implements the `AiProvider` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use mindhit_core::ai::{
    validate_json, AiError, ChatRequest, ChatResponse, Message, ProviderType, Role, StreamHandler,
};
use mindhit_core::ports::AiProvider;
use std::time::Instant;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AiProvider` on top of the OpenAI chat API.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn build_request(
        &self,
        req: &ChatRequest,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, AiError> {
        let opts = &req.options;
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(req.model.as_deref().unwrap_or(&self.model))
            .messages(to_openai_messages(&req.build_messages())?);
        if let Some(temperature) = opts.temperature {
            builder.temperature(temperature as f32);
        }
        if let Some(max_tokens) = opts.max_tokens {
            builder.max_completion_tokens(max_tokens);
        }
        if let Some(top_p) = opts.top_p {
            builder.top_p(top_p as f32);
        }
        if opts.json_mode {
            builder.response_format(ResponseFormat::JsonObject);
        }
        if stream {
            builder.stream(true);
        }
        builder.build().map_err(request_error)
    }
}

fn request_error(e: OpenAIError) -> AiError {
    AiError::Request(format!("openai: {}", e))
}

fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, AiError> {
    messages
        .iter()
        .map(|m| {
            let message: ChatCompletionRequestMessage = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.as_str())
                    .build()
                    .map_err(request_error)?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.as_str())
                    .build()
                    .map_err(request_error)?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(m.content.as_str())
                    .build()
                    .map_err(request_error)?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

//=========================================================================================
// `AiProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AiProvider for OpenAiChatAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, AiError> {
        let request = self.build_request(req, false)?;
        let started = Instant::now();

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(request_error)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(AiError::NoResponse)?;
        if req.options.json_mode {
            validate_json(&content)?;
        }

        let (input_tokens, output_tokens, total_tokens) = response
            .usage
            .as_ref()
            .map_or((0, 0, 0), |u| {
                (u.prompt_tokens as i64, u.completion_tokens as i64, u.total_tokens as i64)
            });

        Ok(ChatResponse {
            thinking: String::new(),
            content,
            input_tokens,
            output_tokens,
            thinking_tokens: 0,
            total_tokens,
            provider: ProviderType::OpenAi,
            model: response.model,
            latency_ms: started.elapsed().as_millis() as i64,
            request_id: Some(response.id),
        }
        .normalized())
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        handler: &mut dyn StreamHandler,
    ) -> Result<ChatResponse, AiError> {
        let request = self.build_request(req, true)?;
        let started = Instant::now();

        let mut stream = match self.client.chat().create_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = request_error(e);
                handler.on_error(&err);
                return Err(err);
            }
        };

        let mut content = String::new();
        let mut model = req.model.clone().unwrap_or_else(|| self.model.clone());
        let mut request_id = None;
        let (mut input_tokens, mut output_tokens, mut total_tokens) = (0i64, 0i64, 0i64);

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let err = request_error(e);
                    handler.on_error(&err);
                    return Err(err);
                }
            };
            if request_id.is_none() {
                request_id = Some(chunk.id.clone());
                model = chunk.model.clone();
            }
            for choice in &chunk.choices {
                if let Some(delta) = choice.delta.content.as_deref() {
                    content.push_str(delta);
                    handler.on_content(delta);
                }
            }
            if let Some(usage) = &chunk.usage {
                input_tokens = usage.prompt_tokens as i64;
                output_tokens = usage.completion_tokens as i64;
                total_tokens = usage.total_tokens as i64;
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

        let response = ChatResponse {
            thinking: String::new(),
            content,
            input_tokens,
            output_tokens,
            thinking_tokens: 0,
            total_tokens,
            provider: ProviderType::OpenAi,
            model,
            latency_ms: started.elapsed().as_millis() as i64,
            request_id,
        }
        .normalized();
        handler.on_done(&response);
        Ok(response)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
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
                debug!(error = %e, "openai health check failed");
                false
            }
        }
    }
}
