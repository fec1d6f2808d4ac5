// Access to the LLM inference server.
//
// - ChatBackend: the seam the rest of the crate talks to
// - openai: reqwest client for OpenAI-compatible servers (llama.cpp)
// - sse: incremental `data:` event parser for streamed completions

pub mod openai;
pub mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiBackend;
use crate::error::Result;

/// Content deltas of a streamed completion, in arrival order.
pub type DeltaStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Sampling and framing for one chat completion. The backend adds the
/// model name and the `stream` flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// `None` leaves tool use up to the server; `Some("none")` forbids it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Main trait for talking to the inference server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run a non-streaming completion and return the assistant text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Run a streaming completion.
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream>;

    /// Ids of the models the server reports; doubles as the liveness probe.
    async fn list_models(&self) -> Result<Vec<String>>;
}
