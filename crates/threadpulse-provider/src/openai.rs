//! `/chat/completions` client shared by every OpenAI-compatible backend.
//!
//! Internally the crate speaks in content blocks (text, tool use, tool result).
//! This module flattens them into the chat-completions message list on the way
//! out and folds `tool_calls` back into blocks on the way in.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{ContentBlock, LlmMessage, LlmProvider, LlmRequest, LlmResponse, ToolDef};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    timeout_secs: u64,
}

/// Coarse classification of a non-success HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    RateLimited,
    Unauthorized,
    BadRequest,
    Upstream,
    Other,
}

impl ApiErrorKind {
    pub fn classify(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimited,
            401 | 403 => Self::Unauthorized,
            400 | 404 | 422 => Self::BadRequest,
            500..=599 => Self::Upstream,
            _ => Self::Other,
        }
    }

    /// Whether the same request may succeed later.
    pub fn retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Upstream)
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self::with_timeout(api_key, api_base, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Chat client build failed, using defaults without a timeout: {e}");
                reqwest::Client::new()
            });
        Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout_secs,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn transport_error(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow!(
                "chat api error (timeout) [retryable]: request timed out after {}s",
                self.timeout_secs
            )
        } else if e.is_connect() {
            anyhow!("chat api error (connect) [retryable]: {e}")
        } else {
            anyhow!("chat api error: {e}")
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = CompletionRequest::from(request);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &raw));
        }

        let completion: Completion = resp
            .json()
            .await
            .context("chat api error: malformed completion body")?;
        LlmResponse::try_from(completion)
    }
}

fn api_error(status: StatusCode, raw: &str) -> anyhow::Error {
    let kind = ApiErrorKind::classify(status);
    let marker = if kind.retryable() { " [retryable]" } else { "" };
    match serde_json::from_str::<ErrorEnvelope>(raw) {
        Ok(ErrorEnvelope { error }) => anyhow!(
            "chat api error ({status}){marker}: {} ({})",
            error.message,
            error.kind.as_deref().unwrap_or("unknown")
        ),
        Err(_) => anyhow!("chat api error ({status}){marker}"),
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

impl From<LlmRequest> for CompletionRequest {
    fn from(request: LlmRequest) -> Self {
        let messages = request
            .system
            .map(|text| WireMessage::plain("system", text))
            .into_iter()
            .chain(request.messages.into_iter().flat_map(expand_message))
            .collect();
        Self {
            model: request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request.tools.into_iter().map(WireTool::from).collect(),
        }
    }
}

/// One internal message becomes zero or one role message followed by one
/// `tool` message per tool result it carries.
fn expand_message(message: LlmMessage) -> Vec<WireMessage> {
    let mut texts = Vec::new();
    let mut calls = Vec::new();
    let mut results = Vec::new();
    for block in message.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => calls.push(WireToolCall {
                id,
                kind: "function".into(),
                function: WireFunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => results.push(WireMessage {
                role: "tool".into(),
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_use_id),
            }),
        }
    }

    let text = texts.join("\n");
    let mut out = Vec::with_capacity(1 + results.len());
    if !text.is_empty() || !calls.is_empty() {
        out.push(WireMessage {
            role: message.role,
            content: (!text.is_empty()).then_some(text),
            tool_calls: calls,
            tool_call_id: None,
        });
    }
    out.extend(results);
    out
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn plain(role: &str, text: String) -> Self {
        Self {
            role: role.into(),
            content: Some(text),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<ToolDef> for WireTool {
    fn from(def: ToolDef) -> Self {
        Self {
            kind: "function",
            function: WireFunctionDef {
                name: def.name,
                description: def.description,
                parameters: def.input_schema,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments, as the API sends them.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl TryFrom<Completion> for LlmResponse {
    type Error = anyhow::Error;

    fn try_from(completion: Completion) -> Result<Self> {
        let Completion { choices, usage } = completion;
        let choice = choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("chat api error: empty choices"))?;

        let text = choice.message.content.unwrap_or_default();
        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.clone() });
        }
        let calls = choice.message.tool_calls.unwrap_or_default();
        content.extend(calls.into_iter().map(|call| {
            // Models occasionally emit invalid JSON here; treat it as no arguments.
            let input = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            }
        }));

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => Some("tool_use".to_string()),
            Some("stop") => Some("end_turn".to_string()),
            _ => choice.finish_reason,
        };

        Ok(LlmResponse {
            text,
            content,
            input_tokens: usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: usage.as_ref().map(|u| u.completion_tokens),
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: serde_json::Value) -> Result<LlmResponse> {
        let completion: Completion = serde_json::from_value(raw).unwrap();
        LlmResponse::try_from(completion)
    }

    #[test]
    fn request_maps_tools_and_tool_results() {
        let req = LlmRequest {
            model: "llama-3.1-8b-instant".into(),
            system: None,
            messages: vec![
                LlmMessage::user("sentiment on r/apple about iPhone 16?"),
                LlmMessage {
                    role: "assistant".into(),
                    content: vec![ContentBlock::ToolUse {
                        id: "call_1".into(),
                        name: "reddit_sentiment_tool".into(),
                        input: serde_json::json!({"query": "subreddit=apple, topic=iPhone 16"}),
                    }],
                },
                LlmMessage {
                    role: "user".into(),
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: "call_1".into(),
                        content: "{\"total\": 3}".into(),
                        is_error: false,
                    }],
                },
            ],
            max_tokens: 256,
            temperature: Some(0.0),
            tools: vec![ToolDef {
                name: "reddit_sentiment_tool".into(),
                description: "Analyze sentiment".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}}
                }),
            }],
        };

        let json = serde_json::to_value(CompletionRequest::from(req)).unwrap();
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["messages"].as_array().unwrap().len(), 3);
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert!(json["messages"][1]["content"].is_null());
        assert_eq!(
            json["messages"][1]["tool_calls"][0]["function"]["name"],
            "reddit_sentiment_tool"
        );
        assert_eq!(json["messages"][2]["role"], "tool");
        assert_eq!(json["messages"][2]["tool_call_id"], "call_1");
    }

    #[test]
    fn system_prompt_leads_and_empty_tools_are_omitted() {
        let req = LlmRequest::simple("m".into(), Some("be friendly".into()), "hi".into());
        let json = serde_json::to_value(CompletionRequest::from(req)).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "be friendly");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json.get("tools").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let resp = parse(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {
                            "name": "reddit_sentiment_tool",
                            "arguments": "{\"query\":\"subreddit=apple, topic=iPhone 16\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        assert!(resp.text.is_empty());
        match &resp.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(input["query"], "subreddit=apple, topic=iPhone 16")
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn malformed_tool_arguments_become_empty_object() {
        let resp = parse(serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c",
                        "type": "function",
                        "function": {"name": "t", "arguments": "not json"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        assert!(matches!(
            &resp.content[0],
            ContentBlock::ToolUse { input, .. } if input.as_object().is_some_and(|o| o.is_empty())
        ));
    }

    #[test]
    fn null_tool_calls_read_as_plain_text() {
        let resp = parse(serde_json::json!({
            "choices": [{
                "message": {"content": "Hello!", "tool_calls": null},
                "finish_reason": "stop"
            }]
        }))
        .unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.content.len(), 1);
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn empty_choices_is_an_error() {
        assert!(parse(serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn rate_limit_is_marked_retryable() {
        let err = api_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"type":"rate_limit_exceeded","message":"slow down"}}"#,
        );
        assert!(err.to_string().contains("[retryable]"));
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn auth_failure_is_not_retryable() {
        let err = api_error(StatusCode::UNAUTHORIZED, "not json");
        assert!(!err.to_string().contains("[retryable]"));
        assert_eq!(ApiErrorKind::classify(StatusCode::FORBIDDEN), ApiErrorKind::Unauthorized);
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base() {
        let provider = OpenAiProvider::new("k", "http://localhost:11434/v1/");
        assert_eq!(provider.api_base(), "http://localhost:11434/v1");
    }
}
