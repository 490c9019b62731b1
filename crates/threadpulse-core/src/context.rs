//! Wiring from a loaded [`ThreadpulseConfig`] to live services.

use std::sync::Arc;

use threadpulse_classifier::ClassifierHandle;
use threadpulse_provider::create_provider;
use threadpulse_source::RedditSource;

use crate::chat::ChatAgent;
use crate::config::{ThreadpulseConfig, ToolBackendKind};
use crate::pipeline::AnalysisPipeline;
use crate::sentiment_tool::{AnalysisBackend, HttpAnalysisClient, SentimentQueryTool};

/// Build the analysis pipeline. Loads the classifier once; a missing model
/// leaves the pipeline running in the unavailable state.
pub fn build_pipeline(config: &ThreadpulseConfig) -> AnalysisPipeline {
    let source = Arc::new(RedditSource::new(config.source.reddit_config()));
    let classifier = ClassifierHandle::load(&config.classifier.classifier_config());
    AnalysisPipeline::new(source, classifier, config.cache.policy())
        .with_settings(config.pipeline.settings())
}

/// Build the chat agent.
///
/// The tool talks to `pipeline` when the backend is `in_process` (building one
/// if none is given), or to `chat.tool.analysis_url` when it is `http`.
pub fn build_chat_agent(
    config: &ThreadpulseConfig,
    pipeline: Option<&Arc<AnalysisPipeline>>,
) -> ChatAgent {
    let chat = &config.chat;
    let backend: Arc<dyn AnalysisBackend> = match chat.tool.backend {
        ToolBackendKind::InProcess => match pipeline {
            Some(p) => Arc::clone(p) as Arc<dyn AnalysisBackend>,
            None => Arc::new(build_pipeline(config)),
        },
        ToolBackendKind::Http => Arc::new(HttpAnalysisClient::with_timeout(
            chat.tool.analysis_url.clone(),
            chat.tool.timeout_secs,
        )),
    };
    let tool = Arc::new(SentimentQueryTool::new(backend));

    match create_provider(&chat.provider) {
        Ok(provider) => {
            tracing::info!(
                "Chat agent ready: model={} mode={:?} tool_backend={:?}",
                chat.model,
                chat.mode,
                chat.tool.backend
            );
            ChatAgent::new(provider, tool, chat.settings())
        }
        Err(e) => {
            tracing::warn!("Chat agent unavailable: {e:#}");
            ChatAgent::unavailable(e.to_string(), tool, chat.settings())
        }
    }
}

/// Everything the HTTP surfaces and the CLI need, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub pipeline: Arc<AnalysisPipeline>,
    pub chat: Arc<ChatAgent>,
}

impl AppContext {
    pub fn from_config(config: &ThreadpulseConfig) -> Self {
        let pipeline = Arc::new(build_pipeline(config));
        let chat = Arc::new(build_chat_agent(config, Some(&pipeline)));
        Self { pipeline, chat }
    }
}
