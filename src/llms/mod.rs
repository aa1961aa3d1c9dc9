//! Completion backends.
//!
//! The engine talks to a language model through the [`CompletionBackend`]
//! trait only. Providers:
//!
//! - [`providers::anthropic`] - Anthropic Messages API over `reqwest`
//! - [`providers::canned`] - fixed or scripted responses for offline use and tests

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use providers::anthropic::AnthropicBackend;
pub use providers::canned::{ScriptedBackend, StaticBackend};

/// One prompt sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_text: String,
    pub user_text: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Per-request timeout. `None` uses the backend default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_units: u64,
    pub output_units: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_units + self.output_units
    }
}

/// Raw text produced by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Backend failures.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API key not set. Set ANTHROPIC_API_KEY or pass a key to the backend")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// A language model that turns a compiled prompt into text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError>;

    /// Provider name used in logs.
    fn provider(&self) -> &str;
}
