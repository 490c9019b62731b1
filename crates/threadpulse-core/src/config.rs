use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use threadpulse_classifier::ClassifierConfig;
use threadpulse_provider::{ProviderConfig, ProviderType};
use threadpulse_schema::Sentiment;
use threadpulse_source::{RedditCredentials, RedditSourceConfig};

use crate::cache::{CachePolicy, DEFAULT_MAX_ENTRIES};
use crate::chat::{
    ChatSettings, DispatchMode, DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_TOKENS,
    DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_MODEL,
};
use crate::pipeline::{PipelineSettings, DEFAULT_EXCERPT_CHARS, DEFAULT_FETCH_LIMIT};
use crate::sentiment_tool::DEFAULT_TOOL_TIMEOUT_SECS;

pub const DEFAULT_CONFIG_FILE: &str = "threadpulse.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadpulseConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the analysis service (`/analyze`, `/cache`).
    #[serde(default = "default_analysis_bind")]
    pub analysis_bind: String,
    /// Address of the chat service (`/chat`).
    #[serde(default = "default_chat_bind")]
    pub chat_bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            analysis_bind: default_analysis_bind(),
            chat_bind: default_chat_bind(),
        }
    }
}

fn default_analysis_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_chat_bind() -> String {
    "127.0.0.1:8001".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_client_id")]
    pub client_id: Option<String>,
    #[serde(default = "default_client_secret")]
    pub client_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub auth_base_url: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            client_secret: default_client_secret(),
            user_agent: default_user_agent(),
            auth_base_url: None,
            api_base_url: None,
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_client_id() -> Option<String> {
    Some("${REDDIT_CLIENT_ID}".to_string())
}

fn default_client_secret() -> Option<String> {
    Some("${REDDIT_CLIENT_SECRET}".to_string())
}

fn default_user_agent() -> Option<String> {
    Some("${REDDIT_USER_AGENT}".to_string())
}

fn default_source_timeout() -> u64 {
    30
}

impl SourceConfig {
    pub fn reddit_config(&self) -> RedditSourceConfig {
        let mut config = RedditSourceConfig::new(RedditCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            user_agent: self.user_agent.clone(),
        })
        .with_timeout(self.timeout_secs);
        if let Some(base) = &self.auth_base_url {
            config.auth_base = base.trim_end_matches('/').to_string();
        }
        if let Some(base) = &self.api_base_url {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_model_dir")]
    pub model_dir: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_labels")]
    pub labels: Vec<Sentiment>,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            model_id: None,
            max_length: default_max_length(),
            batch_size: default_batch_size(),
            labels: default_labels(),
        }
    }
}

fn default_model_dir() -> Option<String> {
    Some("${SENTIMENT_MODEL_DIR}".to_string())
}

fn default_max_length() -> usize {
    threadpulse_classifier::DEFAULT_MAX_LENGTH
}

fn default_batch_size() -> usize {
    threadpulse_classifier::DEFAULT_BATCH_SIZE
}

fn default_labels() -> Vec<Sentiment> {
    threadpulse_classifier::LABELS.to_vec()
}

impl ClassifierSection {
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            model_dir: self.model_dir.as_ref().map(PathBuf::from),
            model_id: self.model_id.clone(),
            max_length: self.max_length,
            batch_size: self.batch_size,
            labels: self.labels.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// `null` disables the size bound.
    #[serde(default = "default_max_entries")]
    pub max_entries: Option<usize>,
    /// `null` keeps entries until evicted or cleared.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: None,
        }
    }
}

fn default_max_entries() -> Option<usize> {
    Some(DEFAULT_MAX_ENTRIES)
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            max_entries: self.max_entries,
            ttl: self.ttl_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

fn default_excerpt_chars() -> usize {
    DEFAULT_EXCERPT_CHARS
}

impl PipelineConfig {
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            fetch_limit: self.fetch_limit,
            excerpt_chars: self.excerpt_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolBackendKind {
    /// Call the pipeline in this process.
    #[default]
    InProcess,
    /// Call a separately running analysis service over HTTP.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub backend: ToolBackendKind,
    #[serde(default = "default_analysis_url")]
    pub analysis_url: String,
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            backend: ToolBackendKind::default(),
            analysis_url: default_analysis_url(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_analysis_url() -> String {
    "http://127.0.0.1:8000/analyze".to_string()
}

fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub mode: DispatchMode,
    #[serde(default = "default_provider")]
    pub provider: ProviderConfig,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default)]
    pub tool: ToolConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            history_window: default_history_window(),
            max_tool_iterations: default_max_tool_iterations(),
            tool: ToolConfig::default(),
        }
    }
}

fn default_provider() -> ProviderConfig {
    ProviderConfig::new(ProviderType::Groq).with_api_key("${GROQ_API_KEY}")
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> Option<f32> {
    Some(0.0)
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

fn default_max_tool_iterations() -> usize {
    DEFAULT_MAX_TOOL_ITERATIONS
}

impl ChatConfig {
    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            mode: self.mode,
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            history_window: self.history_window,
            max_tool_iterations: self.max_tool_iterations,
        }
    }
}

/// Replace every `${VAR}` with the variable's value, or nothing if unset.
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Interpolate, then treat blank as absent.
fn resolve_optional(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|v| resolve_env_var(&v).trim().to_string())
        .filter(|v| !v.is_empty());
}

fn resolve_env(config: &mut ThreadpulseConfig) {
    config.server.analysis_bind = resolve_env_var(&config.server.analysis_bind);
    config.server.chat_bind = resolve_env_var(&config.server.chat_bind);

    let source = &mut config.source;
    resolve_optional(&mut source.client_id);
    resolve_optional(&mut source.client_secret);
    resolve_optional(&mut source.user_agent);
    resolve_optional(&mut source.auth_base_url);
    resolve_optional(&mut source.api_base_url);

    resolve_optional(&mut config.classifier.model_dir);
    resolve_optional(&mut config.classifier.model_id);

    let chat = &mut config.chat;
    resolve_optional(&mut chat.provider.api_key);
    resolve_optional(&mut chat.provider.base_url);
    chat.model = resolve_env_var(&chat.model);
    chat.tool.analysis_url = resolve_env_var(&chat.tool.analysis_url);
}

/// Load configuration.
///
/// An explicit path must exist. Without one, `threadpulse.yaml` in the working
/// directory is used if present, otherwise built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<ThreadpulseConfig> {
    let mut config = match path {
        Some(path) => read_yaml_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.is_file() {
                read_yaml_file(default_path)?
            } else {
                tracing::info!("No {DEFAULT_CONFIG_FILE} found, using built-in defaults");
                ThreadpulseConfig::default()
            }
        }
    };
    resolve_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ThreadpulseConfig) -> Result<()> {
    if config.pipeline.fetch_limit == 0 {
        return Err(anyhow!("pipeline.fetch_limit must be greater than 0"));
    }
    if config.pipeline.excerpt_chars == 0 {
        return Err(anyhow!("pipeline.excerpt_chars must be greater than 0"));
    }
    if config.classifier.max_length == 0 {
        return Err(anyhow!("classifier.max_length must be greater than 0"));
    }
    if config.classifier.batch_size == 0 {
        return Err(anyhow!("classifier.batch_size must be greater than 0"));
    }
    config
        .classifier
        .classifier_config()
        .validate_labels()
        .map_err(|e| anyhow!("classifier.labels: {e}"))?;
    if config.cache.max_entries == Some(0) {
        return Err(anyhow!(
            "cache.max_entries must be greater than 0 (use null for unbounded)"
        ));
    }
    if config.source.timeout_secs == 0 {
        return Err(anyhow!("source.timeout_secs must be greater than 0"));
    }
    if config.chat.max_tokens == 0 {
        return Err(anyhow!("chat.max_tokens must be greater than 0"));
    }
    if config.chat.max_tool_iterations == 0 {
        return Err(anyhow!("chat.max_tool_iterations must be greater than 0"));
    }
    if config.chat.model.trim().is_empty() {
        return Err(anyhow!("chat.model must not be empty"));
    }
    if config.chat.tool.backend == ToolBackendKind::Http
        && config.chat.tool.analysis_url.trim().is_empty()
    {
        return Err(anyhow!("chat.tool.analysis_url is required for the http backend"));
    }
    if config.chat.tool.timeout_secs == 0 {
        return Err(anyhow!("chat.tool.timeout_secs must be greater than 0"));
    }
    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}
