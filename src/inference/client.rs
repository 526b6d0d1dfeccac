//! Chat client seam and an OpenAI-compatible implementation.
//!
//! The Desktop Ops loop only needs one request/response per turn, so the
//! trait is deliberately non-streaming. [`OpenAiChatClient`] speaks the
//! Chat Completions API against any compatible endpoint (Ollama,
//! llama.cpp, vLLM).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{ChatCompletionRequest, ChatMessage, ChatResponse, ToolCall, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout. Local models can take a while on long histories.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Low temperature keeps tool selection deterministic.
const DEFAULT_TEMPERATURE: f32 = 0.1;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// One chat turn: send the history and callable tools, get text and/or calls.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, InferenceError>;
}

// ─── OpenAiChatClient ────────────────────────────────────────────────────────

/// Non-streaming client for `POST {base_url}/chat/completions`.
pub struct OpenAiChatClient {
    http: HttpClient,
    base_url: String,
    temperature: f32,
}

impl OpenAiChatClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434/v1`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, InferenceError> {
        let base_url = base_url.into();
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> ChatCompletionRequest {
        let tools = if tools.is_empty() {
            None
        } else {
            Some(tools.to_vec())
        };
        ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.temperature,
            stream: false,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(model, messages, tools);

        tracing::debug!(
            model,
            messages = messages.len(),
            tools = tools.len(),
            "sending chat completion"
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_chat_response(&body_text)
    }
}

// ─── Response parsing ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Deserialize)]
struct CompletionToolCall {
    id: Option<String>,
    function: CompletionFunction,
}

#[derive(Deserialize)]
struct CompletionFunction {
    name: String,
    /// Usually a JSON string; some runtimes send an object.
    arguments: serde_json::Value,
}

/// Parse a non-streaming chat completion body into a [`ChatResponse`].
pub fn parse_chat_response(body: &str) -> Result<ChatResponse, InferenceError> {
    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse chat completion: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let content = choice.message.content.filter(|c| !c.trim().is_empty());

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let arguments = match tc.function.arguments {
            serde_json::Value::String(raw) if raw.trim().is_empty() => serde_json::json!({}),
            serde_json::Value::String(raw) => {
                serde_json::from_str(&raw).map_err(|e| InferenceError::ToolCallParseError {
                    raw_arguments: raw.clone(),
                    reason: format!("invalid JSON: {e}"),
                })?
            }
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        tool_calls.push(ToolCall {
            id: tc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            arguments,
        });
    }

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_only_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"DONE: all good"}}]}"#;
        let resp = parse_chat_response(body).unwrap();
        assert_eq!(resp.content.as_deref(), Some("DONE: all good"));
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_tool_call_with_string_arguments() {
        let body = r#"{"choices":[{"message":{"content":"","tool_calls":[
            {"id":"c1","type":"function","function":{"name":"builtin:fs:list_dir","arguments":"{\"path\":\".\"}"}}
        ]}}]}"#;
        let resp = parse_chat_response(body).unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "c1");
        assert_eq!(resp.tool_calls[0].arguments["path"], ".");
    }

    #[test]
    fn test_parse_tool_call_with_object_arguments_and_missing_id() {
        let body = r#"{"choices":[{"message":{"tool_calls":[
            {"function":{"name":"builtin:shell:run","arguments":{"argv":["ls"]}}}
        ]}}]}"#;
        let resp = parse_chat_response(body).unwrap();
        assert!(resp.tool_calls[0].id.starts_with("call_"));
        assert_eq!(resp.tool_calls[0].arguments["argv"][0], "ls");
    }

    #[test]
    fn test_parse_invalid_arguments_is_error() {
        let body = r#"{"choices":[{"message":{"tool_calls":[
            {"id":"c1","function":{"name":"x","arguments":"{not json"}}
        ]}}]}"#;
        let err = parse_chat_response(body).unwrap_err();
        assert!(matches!(err, InferenceError::ToolCallParseError { .. }));
    }

    #[test]
    fn test_parse_empty_choices_is_error() {
        assert!(parse_chat_response(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_request_omits_tools_when_empty() {
        let client = OpenAiChatClient::new("http://localhost:11434/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
        let req = client.build_request("m", &[ChatMessage::user("hi")], &[]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("tools"));
        assert!(!json.contains("tool_choice"));
    }
}
