use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{sse, ChatBackend, ChatMessage, ChatRequest, DeltaStream};
use crate::config::BackendConfig;
use crate::error::{ParleyError, Result};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    /// Some servers send `"tool_calls": null` on plain replies.
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Debug, Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<Value>,
}

/// Client for an OpenAI-compatible inference server such as `llama-server`.
pub struct OpenAiBackend {
    client: Client,
    stream_client: Client,
    config: BackendConfig,
}

impl OpenAiBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ParleyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        // A whole-request timeout would cut long streams short.
        let stream_client = Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| ParleyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            config,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.config.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            tool_choice: request.tool_choice.as_deref(),
            stream,
        }
    }
}

/// Reject non-2xx responses, keeping the body text for the error message.
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(ParleyError::Backend {
        status: Some(status.as_u16()),
        message: error_text.trim().to_string(),
    })
}

/// Assistant text of the first choice. A structured tool call with no text
/// is rendered back into `{"name": .., "parameters": ..}` so callers can
/// treat both encodings alike.
fn extract_content(body: &str) -> Result<String> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ParleyError::backend(format!("malformed completion response: {}", e)))?;

    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ParleyError::backend("completion response has no choices"))?;

    let content = message.content.unwrap_or_default();
    if !content.trim().is_empty() {
        return Ok(content);
    }

    match message.tool_calls.unwrap_or_default().into_iter().next() {
        Some(call) => {
            // Arguments normally arrive as a JSON-encoded string.
            let parameters = match call.function.arguments {
                Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                other => other,
            };
            Ok(serde_json::json!({"name": call.function.name, "parameters": parameters}).to_string())
        }
        None => Ok(content),
    }
}

fn model_ids(body: ModelsResponse) -> Vec<String> {
    body.data
        .iter()
        .filter_map(|entry| entry.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = self.url("/v1/chat/completions");
        debug!("Sending completion request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(ParleyError::from_transport)?;

        let response = ensure_success(response).await?;
        let body = response.text().await.map_err(ParleyError::from_transport)?;
        debug!("Raw completion response: {}", body);

        extract_content(&body)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream> {
        let url = self.url("/v1/chat/completions");
        debug!("Opening completion stream to: {}", url);

        let response = self
            .stream_client
            .post(&url)
            .json(&self.body(request, true))
            .send()
            .await
            .map_err(ParleyError::from_transport)?;

        let response = ensure_success(response).await?;
        Ok(sse::content_deltas(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/v1/models"))
            .timeout(self.config.health_timeout())
            .send()
            .await
            .map_err(ParleyError::from_transport)?;

        let response = ensure_success(response).await?;
        let body: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::backend(format!("malformed models response: {}", e)))?;
        Ok(model_ids(body))
    }
}
