//! Summarization backends.
//!
//! * [`AzureChatClient`] calls an Azure OpenAI chat-completions deployment
//!   directly and surfaces the HTTP status and body of a refused call.
//! * [`ProviderSummarizer`] routes the same request through any
//!   `edgequake-llm` provider (OpenAI, Anthropic, Gemini, Ollama, …).

use crate::clients::{SummaryRequest, Summarizer};
use crate::error::{ClientError, DocsumError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "2025-01-01-preview";

// ── Azure OpenAI ─────────────────────────────────────────────────────────────

/// Chat-completions client for one Azure OpenAI deployment.
#[derive(Debug, Clone)]
pub struct AzureChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
}

impl AzureChatClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: [WireMessage<'a>; 1],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Content of the first choice.
fn content_from_response(body: &str) -> Result<String, ClientError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ClientError::Decode(format!("chat completion: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ClientError::Decode("chat completion has no choices[0].message.content".into()))
}

#[async_trait]
impl Summarizer for AzureChatClient {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, ClientError> {
        let body = ChatRequest {
            messages: [WireMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let response = self
            .client
            .post(self.completions_url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!("Chat completion: {} byte response", text.len());
        content_from_response(&text)
    }
}

// ── edgequake-llm provider ───────────────────────────────────────────────────

/// Summarizer backed by an `edgequake-llm` provider.
#[derive(Clone)]
pub struct ProviderSummarizer {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Instantiate a named provider; its API key is read from the environment.
    pub fn from_name(provider: &str, model: &str) -> Result<Self, DocsumError> {
        let llm = ProviderFactory::create_llm_provider(provider, model).map_err(|e| {
            DocsumError::ProviderNotConfigured {
                provider: provider.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(llm))
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, ClientError> {
        let messages = vec![ChatMessage::user(request.prompt.as_str())];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ClientError::Service(e.to_string()))?;
        debug!(
            "Provider summary: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
