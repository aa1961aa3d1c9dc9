//! Backends that never touch the network.
//!
//! [`StaticBackend`] answers every request with the same text and is what
//! the server runs with in offline mode. [`ScriptedBackend`] replays a queue
//! of replies and records every request it receives.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llms::{BackendError, Completion, CompletionBackend, CompletionRequest, TokenUsage};

/// Returns the same completion for every request.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    completion: Completion,
}

impl StaticBackend {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            completion: Completion {
                text: text.into(),
                usage: TokenUsage::default(),
            },
        }
    }

    pub fn with_usage(mut self, input_units: u64, output_units: u64) -> Self {
        self.completion.usage = TokenUsage {
            input_units,
            output_units,
        };
        self
    }
}

impl Default for StaticBackend {
    fn default() -> Self {
        Self::new("{}")
    }
}

#[async_trait]
impl CompletionBackend for StaticBackend {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, BackendError> {
        Ok(self.completion.clone())
    }

    fn provider(&self) -> &str {
        "static"
    }
}

#[derive(Debug)]
enum Reply {
    Completion(Completion),
    Failure { status: u16, body: String },
}

/// Replays queued replies in order and records requests.
///
/// When the queue is empty the last reply is repeated; with nothing queued
/// at all every call fails.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Completion>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply with the given token usage.
    pub fn reply(self, text: impl Into<String>, input_units: u64, output_units: u64) -> Self {
        self.replies.lock().push_back(Reply::Completion(Completion {
            text: text.into(),
            usage: TokenUsage {
                input_units,
                output_units,
            },
        }));
        self
    }

    /// Queue a provider failure.
    pub fn fail(self, status: u16, body: impl Into<String>) -> Self {
        self.replies.lock().push_back(Reply::Failure {
            status,
            body: body.into(),
        });
        self
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().pop_front();
        match next {
            Some(Reply::Completion(completion)) => {
                *self.last.lock() = Some(completion.clone());
                Ok(completion)
            }
            Some(Reply::Failure { status, body }) => Err(BackendError::Api { status, body }),
            None => self.last.lock().clone().ok_or_else(|| {
                BackendError::UnexpectedResponse("no scripted reply left".to_string())
            }),
        }
    }

    fn provider(&self) -> &str {
        "scripted"
    }
}
