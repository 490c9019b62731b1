//! Conversational loop around the sentiment query tool.
//!
//! History is owned by the caller and round-tripped on every request. A
//! successful turn appends exactly one user and one assistant message; any
//! failure returns the supplied history untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use threadpulse_provider::{ContentBlock, LlmMessage, LlmProvider, LlmRequest};
use threadpulse_schema::{ChatMessage, ChatResponse, Role};

use crate::error::ChatError;
use crate::sentiment_tool::SentimentQueryTool;
use crate::tool::ToolRegistry;

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_HISTORY_WINDOW: usize = 5;
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 4;

pub const UNAVAILABLE_REPLY: &str =
    "Error: Chat agent failed to initialize. Check the language model API key.";
pub const FAILURE_REPLY: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

pub const SYSTEM_PROMPT: &str = "You are a helpful and engaging sentiment analysis chatbot. \
Your primary function is to analyze public opinion on specific products or topics \
by utilizing the 'reddit_sentiment_tool'. \
You MUST use this tool ONLY if the user asks for a specific subreddit and topic \
(e.g., 'What is the sentiment on r/apple about the iPhone 16?'). \
Do NOT use the tool for general conversation or common knowledge questions. \
Always summarize the JSON output from the tool in a friendly, conversational way, \
citing the numbers (positive/negative/neutral count).";

/// How the agent decides to call the sentiment tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Call the tool when the utterance mentions both "subreddit" and "topic".
    Simple,
    /// Let the model call the tool through function calling.
    #[default]
    Agentic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub mode: DispatchMode,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Number of prior exchanges (user + assistant pairs) shown to the model.
    pub history_window: usize,
    pub max_tool_iterations: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: Some(0.0),
            history_window: DEFAULT_HISTORY_WINDOW,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }
}

enum Backend {
    Ready(Arc<dyn LlmProvider>),
    Unavailable(String),
}

pub struct ChatAgent {
    backend: Backend,
    tool: Arc<SentimentQueryTool>,
    registry: ToolRegistry,
    settings: ChatSettings,
}

impl ChatAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tool: Arc<SentimentQueryTool>,
        settings: ChatSettings,
    ) -> Self {
        Self::build(Backend::Ready(provider), tool, settings)
    }

    /// An agent that answers every request with [`UNAVAILABLE_REPLY`].
    pub fn unavailable(
        reason: impl Into<String>,
        tool: Arc<SentimentQueryTool>,
        settings: ChatSettings,
    ) -> Self {
        Self::build(Backend::Unavailable(reason.into()), tool, settings)
    }

    fn build(backend: Backend, tool: Arc<SentimentQueryTool>, settings: ChatSettings) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone());
        Self {
            backend,
            tool,
            registry,
            settings,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.backend, Backend::Ready(_))
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Produce a reply and the updated history. Never fails.
    pub async fn respond(&self, user_input: &str, history: Vec<ChatMessage>) -> ChatResponse {
        match self.try_respond(user_input, &history).await {
            Ok(reply) => {
                let mut new_chat_history = history;
                new_chat_history.push(ChatMessage::user(user_input));
                new_chat_history.push(ChatMessage::assistant(reply.clone()));
                ChatResponse {
                    ai_response: reply,
                    new_chat_history,
                }
            }
            Err(ChatError::Unavailable(reason)) => {
                tracing::debug!("Chat request refused, agent unavailable: {reason}");
                ChatResponse {
                    ai_response: UNAVAILABLE_REPLY.to_string(),
                    new_chat_history: history,
                }
            }
            Err(ChatError::Model(e)) => {
                tracing::warn!("Chat model call failed: {e:#}");
                ChatResponse {
                    ai_response: FAILURE_REPLY.to_string(),
                    new_chat_history: history,
                }
            }
        }
    }

    pub async fn try_respond(
        &self,
        user_input: &str,
        history: &[ChatMessage],
    ) -> Result<String, ChatError> {
        let provider = match &self.backend {
            Backend::Ready(p) => p.as_ref(),
            Backend::Unavailable(reason) => return Err(ChatError::Unavailable(reason.clone())),
        };
        let mut messages = context_messages(history, self.settings.history_window);

        match self.settings.mode {
            DispatchMode::Simple => {
                let prompt = if should_dispatch(user_input) {
                    let tool_result = self.tool.invoke(user_input).await;
                    format!(
                        "Here's the sentiment analysis result: {tool_result}. \
                         Please summarize it in a friendly way."
                    )
                } else {
                    user_input.to_string()
                };
                messages.push(LlmMessage::user(prompt));
                let resp = provider.chat(self.request(messages, false)).await?;
                Ok(resp.text)
            }
            DispatchMode::Agentic => {
                messages.push(LlmMessage::user(user_input));
                self.tool_use_loop(provider, messages).await
            }
        }
    }

    async fn tool_use_loop(
        &self,
        provider: &dyn LlmProvider,
        mut messages: Vec<LlmMessage>,
    ) -> Result<String, ChatError> {
        let max_iterations = self.settings.max_tool_iterations;

        for _iteration in 0..max_iterations {
            let resp = provider.chat(self.request(messages.clone(), true)).await?;

            let tool_uses = resp.tool_uses();
            if tool_uses.is_empty() || resp.stop_reason.as_deref() != Some("tool_use") {
                return Ok(resp.text);
            }

            messages.push(LlmMessage {
                role: "assistant".into(),
                content: resp.content.clone(),
            });

            let tool_futures: Vec<_> = tool_uses
                .into_iter()
                .map(|(id, name, input)| async move {
                    tracing::info!("Model requested tool {name}");
                    match self.registry.execute(&name, input).await {
                        Ok(output) => ContentBlock::ToolResult {
                            tool_use_id: id,
                            content: output.content,
                            is_error: output.is_error,
                        },
                        Err(e) => ContentBlock::ToolResult {
                            tool_use_id: id,
                            content: format!("Tool execution error: {e}"),
                            is_error: true,
                        },
                    }
                })
                .collect();
            let tool_results = futures::future::join_all(tool_futures).await;

            messages.push(LlmMessage {
                role: "user".into(),
                content: tool_results,
            });
        }

        tracing::warn!(
            "Tool loop exhausted {max_iterations} iterations, requesting final answer without tools"
        );
        let resp = provider.chat(self.request(messages, false)).await?;
        Ok(resp.text)
    }

    fn request(&self, messages: Vec<LlmMessage>, with_tools: bool) -> LlmRequest {
        LlmRequest {
            model: self.settings.model.clone(),
            system: Some(SYSTEM_PROMPT.to_string()),
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            tools: if with_tools {
                self.registry.tool_defs()
            } else {
                vec![]
            },
        }
    }
}

/// Keyword trigger used by [`DispatchMode::Simple`].
pub fn should_dispatch(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();
    lower.contains("subreddit") && lower.contains("topic")
}

/// The last `window` exchanges of `history` as model messages.
fn context_messages(history: &[ChatMessage], window: usize) -> Vec<LlmMessage> {
    let start = history.len().saturating_sub(window.saturating_mul(2));
    history[start..]
        .iter()
        .map(|m| match m.role {
            Role::User => LlmMessage::user(m.content.clone()),
            Role::Assistant => LlmMessage::assistant(m.content.clone()),
        })
        .collect()
}
