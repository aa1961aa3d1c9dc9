//! Anthropic Messages API backend.
//!
//! Sends the compiled system text as the top-level `system` parameter and
//! the user text as a single user message to `POST /v1/messages`.
//! Token usage comes from `usage.input_tokens` / `usage.output_tokens`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llms::{BackendError, Completion, CompletionBackend, CompletionRequest, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const BODY_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Backend calling Claude models through the Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    api_key: Option<String>,
    base_url: String,
    /// Transport-level retries for 429 / 5xx responses. Defaults to 0.
    pub max_retries: u32,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: 0,
            client: reqwest::Client::new(),
        }
    }

    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("ANTHROPIC_API_KEY").ok())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the request body for the Messages API.
    pub fn build_request_body(request: &CompletionRequest) -> Value {
        json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_text,
            "messages": [
                { "role": "user", "content": request.user_text }
            ],
        })
    }

    /// Turn a response body into a [`Completion`].
    ///
    /// The first content block must be text; further text blocks are
    /// appended.
    fn parse_response(body: &str) -> Result<Completion, BackendError> {
        let response: MessagesResponse = serde_json::from_str(body).map_err(|e| {
            BackendError::UnexpectedResponse(format!(
                "{} - Body: {}",
                e,
                body_excerpt(body)
            ))
        })?;

        let mut text = String::new();
        for (i, block) in response.content.iter().enumerate() {
            match block {
                ContentBlock::Text { text: part } => text.push_str(part),
                ContentBlock::Other if i == 0 => {
                    return Err(BackendError::UnexpectedResponse(
                        "Unexpected response format from Claude".to_string(),
                    ))
                }
                ContentBlock::Other => {}
            }
        }
        if response.content.is_empty() {
            return Err(BackendError::UnexpectedResponse(
                "No content in Anthropic response".to_string(),
            ));
        }

        let usage = response.usage.unwrap_or_default();
        Ok(Completion {
            text,
            usage: TokenUsage {
                input_units: usage.input_tokens,
                output_units: usage.output_tokens,
            },
        })
    }
}

/// First `BODY_EXCERPT_CHARS` characters of a response body.
fn body_excerpt(body: &str) -> &str {
    body.char_indices()
        .nth(BODY_EXCERPT_CHARS)
        .map_or(body, |(i, _)| &body[..i])
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError> {
        log::debug!(
            "AnthropicBackend.complete: model={}, max_tokens={}",
            request.model,
            request.max_tokens
        );

        let api_key = self.api_key.as_deref().ok_or(BackendError::MissingApiKey)?;
        let endpoint = format!("{}/v1/messages", self.base_url);
        let body = Self::build_request_body(&request);
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut last_error: Option<BackendError> = None;
        let mut retry_delay = Duration::from_secs(1);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!(
                    "Anthropic API retry attempt {} after {:?}",
                    attempt,
                    retry_delay
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match self
                .client
                .post(&endpoint)
                .timeout(timeout)
                .header("content-type", "application/json")
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(e.into());
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    retry_delay = Duration::from_secs(retry_after);
                }
            }

            let text = response.text().await?;
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status.is_server_error()
                || status.as_u16() == 529
            {
                last_error = Some(BackendError::Api {
                    status: status.as_u16(),
                    body: text,
                });
                continue;
            }
            if !status.is_success() {
                return Err(BackendError::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let completion = Self::parse_response(&text)?;
            log::debug!(
                "Anthropic usage: input={}, output={}",
                completion.usage.input_units,
                completion.usage.output_units
            );
            return Ok(completion);
        }

        Err(last_error.unwrap_or_else(|| {
            BackendError::UnexpectedResponse("Anthropic API call failed after all retries".into())
        }))
    }

    fn provider(&self) -> &str {
        "anthropic"
    }
}
