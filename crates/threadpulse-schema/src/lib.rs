use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message returned by the analyze endpoint when neither data nor analysis
/// could be produced.
pub const NO_DATA_MESSAGE: &str = "Could not fetch data or model failed to load.";

/// Whether a fetched item is a top-level post or a reply beneath one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Reply,
}

impl ItemKind {
    /// Prefix used to make item ids unique across kinds.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Post => "p_",
            Self::Reply => "c_",
        }
    }
}

/// A post or reply as returned by a content source. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub id: String,
    pub text: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

impl RawItem {
    pub fn post(native_id: &str, text: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::new(ItemKind::Post, native_id, text, scope)
    }

    pub fn reply(native_id: &str, text: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::new(ItemKind::Reply, native_id, text, scope)
    }

    fn new(
        kind: ItemKind,
        native_id: &str,
        text: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{}{native_id}", kind.id_prefix()),
            text: text.into(),
            scope: scope.into(),
            kind,
        }
    }
}

/// Coarse topical tag assigned by keyword rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Aspect {
    Performance,
    Battery,
    Design,
    Software,
    Overall,
    /// Used when analysis did not run.
    #[serde(rename = "N/A")]
    NotApplicable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
    /// The classifier was present but could not label this item.
    Error,
    /// No classifier was ever loaded.
    Unavailable,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Positive => "positive",
            Self::Error => "error",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analyzed item, derived one-to-one from a [`RawItem`].
///
/// Serialized with the field names existing clients already consume
/// (`text`, `timestamp`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzedItem {
    pub id: String,
    #[serde(rename = "text")]
    pub text_excerpt: String,
    pub aspect: Aspect,
    pub sentiment: Sentiment,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

/// Echo of the query parameters in a successful analyze response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryEcho {
    pub subreddit: String,
    pub topic: String,
}

/// Body of `GET /analyze`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AnalyzeResponse {
    Success {
        query: QueryEcho,
        results_count: usize,
        #[serde(default)]
        analysis_source: String,
        data: Vec<AnalyzedItem>,
    },
    Error {
        message: String,
    },
}

impl AnalyzeResponse {
    pub fn no_data() -> Self {
        Self::Error {
            message: NO_DATA_MESSAGE.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Compact summary handed to the language model after a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentSummary {
    #[serde(rename = "total_posts_analyzed")]
    pub total: usize,
    #[serde(rename = "positive_count")]
    pub positive: usize,
    #[serde(rename = "negative_count")]
    pub negative: usize,
    #[serde(rename = "neutral_count")]
    pub neutral: usize,
    #[serde(rename = "sample_data_for_LLM", alias = "sample_data")]
    pub sample: Vec<AnalyzedItem>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /chat`. History is owned by the caller and round-tripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_input: String,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub ai_response: String,
    pub new_chat_history: Vec<ChatMessage>,
}
