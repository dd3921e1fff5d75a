//! Inference client boundary.
//!
//! The core only depends on [`CompletionClient`]; transport, authentication
//! and endpoint selection belong to the implementation (see the `http`
//! feature for an OpenAI-compatible one).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Model, sampling temperature and reply size shared by every call of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_reply_tokens")]
    pub max_reply_tokens: u32,
}

fn default_max_reply_tokens() -> u32 {
    1000
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_reply_tokens: default_max_reply_tokens(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_reply_tokens(mut self, max_reply_tokens: u32) -> Self {
        self.max_reply_tokens = max_reply_tokens;
        self
    }
}

/// A single chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn new(settings: &ModelSettings, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_reply_tokens,
        }
    }

    /// Text of the last user message, if any.
    pub fn user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    /// The service asked us to slow down; the only retryable signal.
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[cfg(feature = "http")]
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl InferenceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Remote completion service.
///
/// Implementations are shared across every worker, so they must be
/// stateless or internally synchronised.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generated text, or `Ok(None)` when the service returned no content.
    async fn complete(&self, request: &CompletionRequest)
    -> Result<Option<String>, InferenceError>;
}
