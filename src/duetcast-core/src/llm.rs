//! Language-model capability.
//!
//! The dialog only needs one operation from the model: turn an ordered list
//! of messages into one completion. [`OpenAiChat`] talks to any
//! OpenAI-compatible endpoint; tests substitute scripted models.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::DuetError;
use crate::settings::ApiCredentials;

/// One message of a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    System(String),
    User(String),
}

impl ChatMessage {
    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System(text) | ChatMessage::User(text) => text,
        }
    }
}

/// A single completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Return the completion text, trimmed; an empty completion is `Ok("")`.
    async fn complete(&self, request: ChatRequest) -> Result<String, DuetError>;
}

/// Chat completions over an OpenAI-compatible API.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    max_retries: u32,
}

impl OpenAiChat {
    /// Build the client once; fails before any request when no key is configured.
    pub fn new(credentials: &ApiCredentials, model: impl Into<String>) -> Result<Self, DuetError> {
        let api_key = credentials.require_key()?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DuetError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&credentials.api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            model: model.into(),
            max_retries: 3,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: ChatRequest) -> Result<String, DuetError> {
        let messages: Vec<ChatCompletionRequestMessage> = request
            .messages
            .into_iter()
            .map(|m| match m {
                ChatMessage::System(content) => {
                    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                        content: content.into(),
                        name: None,
                    })
                }
                ChatMessage::User(content) => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: content.into(),
                        name: None,
                    })
                }
            })
            .collect();

        let api_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature)
            .messages(messages)
            .build()?;

        debug!(model = %self.model, max_tokens = request.max_tokens, "requesting completion");

        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }

            match self.client.chat().create(api_request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    return Ok(content.trim().to_string());
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "completion request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map(DuetError::from).unwrap_or_else(|| {
            DuetError::Configuration("Unknown API error after retries".to_string())
        }))
    }
}
