//! HTTP client for OpenAI-compatible chat-completions backends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use chat_agent_core::{Error, Message, ModelClient, ToolSchema};

use crate::wire::{ChatRequest, ChatResponse};

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Backend connection settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further attempt.
    pub retry_base_delay: Duration,
}

impl OpenAiConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// Chat-completions client.
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Backend(format!("Failed to build HTTP client: {e}")))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        info!(endpoint = %endpoint, model = %config.model, "Model backend configured");
        Ok(Self {
            http,
            config,
            endpoint,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send the history and return the assistant reply, retrying transient failures.
    pub async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Message, Error> {
        let request = ChatRequest::new(&self.config.model, history, tools);
        let mut attempt = 0;

        loop {
            match self.send(&request).await {
                Ok(response) => return into_reply(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying model request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(error = %e, attempts = attempt + 1, "Model request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, Error> {
        debug!(
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion request"
        );

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = format!("{status} - {}", text.trim());
            return Err(if is_transient(status) {
                Error::Transport(message)
            } else {
                Error::Backend(message)
            });
        }

        resp.json::<ChatResponse>()
            .await
            .map_err(|e| Error::MalformedResponse(format!("invalid response body: {e}")))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn into_reply(response: ChatResponse) -> Result<Message, Error> {
    if let Some(usage) = &response.usage {
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Model usage"
        );
    }

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::MalformedResponse("response has no choices".into()))?;

    let message = choice.message.into_message()?;
    if message.has_tool_calls() {
        for call in &message.tool_calls {
            info!(tool = %call.name, id = %call.id, "Model requested tool");
        }
    } else {
        let preview: String = message.content.chars().take(100).collect();
        debug!(
            preview = %preview,
            finish_reason = ?choice.finish_reason,
            "Model text output"
        );
    }
    Ok(message)
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Message, Error> {
        self.complete(history, tools).await
    }
}
