//! LLM endpoint access.
//!
//! Both runtimes speak the OpenAI-compatible chat-completions shape:
//! `choices[0].message` carries optional text content plus raw
//! `tool_calls` entries (`{id, function: {name, arguments}}`). The raw
//! tool-call JSON is preserved so it can be echoed back verbatim in the
//! assistant turn; normalisation happens later in [`crate::parse`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// A chat-completion request. `messages` are raw JSON message objects so
/// tool-role messages with `tool_call_id` can be represented directly.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Value>,
    /// OpenAI-style tool schemas; omitted from the wire when empty.
    pub tools: Vec<Value>,
    pub max_tokens: u32,
}

/// The assistant message extracted from a completion.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: String,
    /// Raw tool-call objects exactly as the endpoint returned them.
    pub tool_calls: Vec<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("response did not include an assistant message")]
    MissingMessage,
}

/// Common interface for the completion endpoint; mocked in runtime tests.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat_completion(&self, req: &ChatRequest) -> Result<AssistantTurn, LlmError>;
}

/// OpenRouter-style OpenAI-compatible client.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    /// Base URL without trailing slash; `/v1/chat/completions` is appended.
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: Option<ApiMessage>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    /// Absent or `null` both mean "no tool calls".
    #[serde(default)]
    tool_calls: Option<Vec<Value>>,
}

fn build_request_body(req: &ChatRequest) -> Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];
    messages.extend(req.messages.iter().cloned());

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    });
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(req.tools.clone());
    }
    body
}

#[async_trait]
impl ChatClient for OpenRouterClient {
    async fn chat_completion(&self, req: &ChatRequest) -> Result<AssistantTurn, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = build_request_body(req);

        debug!(model = %req.model, tools = req.tools.len(), "sending chat completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat completion API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let message = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or(LlmError::MissingMessage)?;

        Ok(AssistantTurn {
            content: message.content.unwrap_or_default(),
            tool_calls: message.tool_calls.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_prepends_system_and_omits_empty_tools() {
        let req = ChatRequest {
            model: "test-model".to_string(),
            system: "persona".to_string(),
            messages: vec![serde_json::json!({"role": "user", "content": "hi"})],
            tools: vec![],
            max_tokens: 256,
        };
        let body = build_request_body(&req);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn request_body_includes_tools_when_present() {
        let req = ChatRequest {
            model: "test-model".to_string(),
            system: String::new(),
            messages: vec![],
            tools: vec![serde_json::json!({"type": "function"})],
            max_tokens: 256,
        };
        let body = build_request_body(&req);
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    }
}
