//! `reddit_sentiment_tool`: the string-in, string-out bridge between the chat
//! model and the analysis pipeline.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use threadpulse_provider::ToolDef;
use threadpulse_schema::{AnalyzeResponse, Sentiment, SentimentSummary};

use crate::error::ToolError;
use crate::pipeline::AnalysisPipeline;
use crate::tool::{ToolExecutor, ToolOutput};

pub const TOOL_NAME: &str = "reddit_sentiment_tool";
pub const SAMPLE_SIZE: usize = 3;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

static SUBREDDIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)subreddit=([^,]+)").expect("static regex"));
static TOPIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)topic=(.*)").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolQuery {
    pub subreddit: String,
    pub topic: String,
}

/// Parse `subreddit=<name>, topic=<keyword>` out of free text.
pub fn parse_query(query: &str) -> Result<ToolQuery, ToolError> {
    let capture = |re: &Regex| {
        re.captures(query)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().trim_matches(|c: char| c == '"' || c == '\'').trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let subreddit = capture(&*SUBREDDIT_RE).ok_or(ToolError::Parse)?;
    let topic = capture(&*TOPIC_RE).ok_or(ToolError::Parse)?;
    Ok(ToolQuery { subreddit, topic })
}

/// Count labels and keep a small sample. Non-success envelopes become upstream errors.
pub fn summarize(response: &AnalyzeResponse) -> Result<SentimentSummary, ToolError> {
    match response {
        AnalyzeResponse::Success {
            results_count,
            data,
            ..
        } => {
            let count = |s: Sentiment| data.iter().filter(|i| i.sentiment == s).count();
            Ok(SentimentSummary {
                total: *results_count,
                positive: count(Sentiment::Positive),
                negative: count(Sentiment::Negative),
                neutral: count(Sentiment::Neutral),
                sample: data.iter().take(SAMPLE_SIZE).cloned().collect(),
            })
        }
        AnalyzeResponse::Error { message } => Err(ToolError::Upstream {
            message: message.clone(),
        }),
    }
}

/// Where the tool gets analysis results from.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, subreddit: &str, topic: &str) -> Result<AnalyzeResponse, ToolError>;
}

#[async_trait]
impl AnalysisBackend for AnalysisPipeline {
    async fn analyze(&self, subreddit: &str, topic: &str) -> Result<AnalyzeResponse, ToolError> {
        Ok(self.report(subreddit, topic).await)
    }
}

/// Calls a running analysis service's `GET /analyze`.
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    url: String,
}

impl HttpAnalysisClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, DEFAULT_TOOL_TIMEOUT_SECS)
    }

    pub fn with_timeout(url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Analysis client build failed, using defaults without a timeout: {e}");
                reqwest::Client::new()
            });
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AnalysisBackend for HttpAnalysisClient {
    async fn analyze(&self, subreddit: &str, topic: &str) -> Result<AnalyzeResponse, ToolError> {
        let connect = |e: reqwest::Error| ToolError::Connect {
            url: self.url.clone(),
            reason: e.to_string(),
        };
        let resp = self
            .client
            .get(&self.url)
            .query(&[("subreddit", subreddit), ("topic", topic)])
            .send()
            .await
            .map_err(connect)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Connect {
                url: self.url.clone(),
                reason: format!("HTTP {status}"),
            });
        }
        resp.json::<AnalyzeResponse>()
            .await
            .map_err(|e| ToolError::Unexpected(format!("invalid analysis response: {e}")))
    }
}

pub struct SentimentQueryTool {
    backend: Arc<dyn AnalysisBackend>,
}

impl SentimentQueryTool {
    pub fn new(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self { backend }
    }

    /// Always returns text: the JSON summary, or a description of what went wrong.
    pub async fn invoke(&self, query: &str) -> String {
        match self.try_invoke(query).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("{TOOL_NAME} failed for query '{query}': {e}");
                e.to_string()
            }
        }
    }

    pub async fn try_invoke(&self, query: &str) -> Result<String, ToolError> {
        let parsed = parse_query(query)?;
        tracing::info!(
            "{TOOL_NAME}: analyzing r/{} about '{}'",
            parsed.subreddit,
            parsed.topic
        );
        let response = self.backend.analyze(&parsed.subreddit, &parsed.topic).await?;
        let summary = summarize(&response)?;
        serde_json::to_string_pretty(&summary).map_err(|e| ToolError::Unexpected(e.to_string()))
    }
}

#[async_trait]
impl ToolExecutor for SentimentQueryTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: TOOL_NAME.into(),
            description: "Analyzes sentiment on Reddit for a given subreddit and topic. \
                The query MUST be formatted exactly as 'subreddit=<name>, topic=<keyword>'. \
                Example: 'subreddit=apple, topic=iPhone 16'"
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "subreddit=<name>, topic=<keyword>"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let query = match &input {
            serde_json::Value::String(s) => s.as_str(),
            other => other["query"].as_str().unwrap_or_default(),
        };
        Ok(match self.try_invoke(query).await {
            Ok(summary) => ToolOutput::ok(summary),
            Err(e) => {
                tracing::warn!("{TOOL_NAME} failed for query '{query}': {e}");
                ToolOutput::error(e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threadpulse_schema::{AnalyzedItem, Aspect, QueryEcho};

    fn success(labels: &[Sentiment]) -> AnalyzeResponse {
        AnalyzeResponse::Success {
            query: QueryEcho {
                subreddit: "apple".into(),
                topic: "iPhone 16".into(),
            },
            results_count: labels.len(),
            analysis_source: "test".into(),
            data: labels
                .iter()
                .enumerate()
                .map(|(i, s)| AnalyzedItem {
                    id: format!("p_{i}"),
                    text_excerpt: "text...".into(),
                    aspect: Aspect::Overall,
                    sentiment: *s,
                    observed_at: Utc::now(),
                })
                .collect(),
        }
    }

    struct Canned(AnalyzeResponse);

    #[async_trait]
    impl AnalysisBackend for Canned {
        async fn analyze(&self, _: &str, _: &str) -> Result<AnalyzeResponse, ToolError> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl AnalysisBackend for Unreachable {
        async fn analyze(&self, _: &str, _: &str) -> Result<AnalyzeResponse, ToolError> {
            Err(ToolError::Connect {
                url: "http://127.0.0.1:9/analyze".into(),
                reason: "connection refused".into(),
            })
        }
    }

    #[test]
    fn parses_subreddit_and_topic() {
        let q = parse_query("subreddit=apple, topic=iPhone 16").unwrap();
        assert_eq!(q.subreddit, "apple");
        assert_eq!(q.topic, "iPhone 16");
    }

    #[test]
    fn parsing_is_case_insensitive_and_trims() {
        let q = parse_query("SubReddit= android ,  TOPIC= Pixel 9 ").unwrap();
        assert_eq!(q.subreddit, "android");
        assert_eq!(q.topic, "Pixel 9");
    }

    #[test]
    fn quoted_values_are_unwrapped() {
        let q = parse_query("subreddit='apple', topic=\"iPhone 16\"").unwrap();
        assert_eq!(q.subreddit, "apple");
        assert_eq!(q.topic, "iPhone 16");
    }

    #[test]
    fn missing_topic_is_parse_error() {
        assert!(matches!(
            parse_query("subreddit=apple"),
            Err(ToolError::Parse)
        ));
        assert!(matches!(parse_query("topic=x"), Err(ToolError::Parse)));
        assert!(matches!(
            parse_query("subreddit=apple, topic=   "),
            Err(ToolError::Parse)
        ));
    }

    #[test]
    fn summarize_counts_labels_and_samples_three() {
        use Sentiment::*;
        let resp = success(&[Positive, Positive, Negative, Neutral, Error]);
        let s = summarize(&resp).unwrap();
        assert_eq!(s.total, 5);
        assert_eq!((s.positive, s.negative, s.neutral), (2, 1, 1));
        assert_eq!(s.sample.len(), 3);
        assert_eq!(s.sample[0].id, "p_0");
    }

    #[test]
    fn summarize_error_envelope_is_upstream_error() {
        let err = summarize(&AnalyzeResponse::no_data()).unwrap_err();
        assert!(matches!(err, ToolError::Upstream { .. }));
    }

    #[tokio::test]
    async fn invoke_returns_json_summary() {
        use Sentiment::*;
        let tool = SentimentQueryTool::new(Arc::new(Canned(success(&[Positive, Neutral]))));
        let out = tool.invoke("subreddit=apple, topic=iPhone 16").await;
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["total_posts_analyzed"], 2);
        assert_eq!(json["positive_count"], 1);
        assert_eq!(json["neutral_count"], 1);
    }

    #[tokio::test]
    async fn invoke_never_fails() {
        let tool = SentimentQueryTool::new(Arc::new(Unreachable));
        let out = tool.invoke("subreddit=apple, topic=iPhone").await;
        assert!(out.starts_with("Error connecting"));

        let out = tool.invoke("tell me about apple").await;
        assert!(out.starts_with("Error: Query format is incorrect"));

        let tool = SentimentQueryTool::new(Arc::new(Canned(AnalyzeResponse::no_data())));
        let out = tool.invoke("subreddit=apple, topic=iPhone").await;
        assert_eq!(
            out,
            "API returned an error status: Could not fetch data or model failed to load."
        );
    }

    #[tokio::test]
    async fn executor_flags_errors() {
        let tool = SentimentQueryTool::new(Arc::new(Unreachable));
        let out = tool
            .execute(serde_json::json!({"query": "subreddit=apple, topic=iPhone"}))
            .await
            .unwrap();
        assert!(out.is_error);

        let tool = SentimentQueryTool::new(Arc::new(Canned(success(&[Sentiment::Positive]))));
        let out = tool
            .execute(serde_json::json!("subreddit=apple, topic=iPhone"))
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(tool.definition().name, "reddit_sentiment_tool");
    }
}
