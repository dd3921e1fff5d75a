//! OpenAI-compatible `chat/completions` client over HTTP.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{ChatMessage, CompletionClient, CompletionRequest, InferenceError};

#[derive(Debug, Clone)]
enum Endpoint {
    /// `{base}/chat/completions`, bearer token, model in the body.
    OpenAi { base_url: String },
    /// Deployment named after the model, `api-key` header.
    Azure { endpoint: String, api_version: String },
}

/// HTTP completion client for OpenAI and Azure OpenAI style services.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    endpoint: Endpoint,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl ChatCompletionsClient {
    /// `base_url` like `https://api.openai.com/v1`.
    pub fn openai(base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: Endpoint::OpenAi {
                base_url: base_url.trim_end_matches('/').to_string(),
            },
            api_key: api_key.into(),
        }
    }

    /// `endpoint` like `https://my-resource.openai.azure.com`.
    pub fn azure(
        endpoint: &str,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: Endpoint::Azure {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_version: api_version.into(),
            },
            api_key: api_key.into(),
        }
    }

    fn url(&self, model: &str) -> String {
        match &self.endpoint {
            Endpoint::OpenAi { base_url } => format!("{base_url}/chat/completions"),
            Endpoint::Azure {
                endpoint,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{model}/chat/completions?api-version={api_version}"
            ),
        }
    }

    fn body<'a>(&self, request: &'a CompletionRequest) -> ChatRequestBody<'a> {
        ChatRequestBody {
            model: match self.endpoint {
                Endpoint::OpenAi { .. } => Some(request.model.as_str()),
                Endpoint::Azure { .. } => None,
            },
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        }
    }
}

fn first_content(body: ChatResponseBody) -> Option<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Option<String>, InferenceError> {
        let url = self.url(&request.model);
        debug!(url = %url, messages = request.messages.len(), "chat completion");

        let builder = self.client.post(&url).json(&self.body(request));
        let builder = match self.endpoint {
            Endpoint::OpenAi { .. } => builder.bearer_auth(&self.api_key),
            Endpoint::Azure { .. } => builder.header("api-key", &self.api_key),
        };
        let resp = builder.send().await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::RateLimited(body));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        let body: ChatResponseBody =
            serde_json::from_str(&text).map_err(|e| InferenceError::Decode(e.to_string()))?;
        Ok(first_content(body))
    }
}
