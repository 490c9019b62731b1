pub mod openai;
pub mod openai_compat;
pub mod types;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::{ApiErrorKind, OpenAiProvider};
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
}

// ============================================================
// Provider Configuration
// ============================================================

/// Provider type identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    Groq,
    OpenAI,
    Ollama,
    /// Custom OpenAI-compatible endpoint
    Custom,
    /// Offline echo provider, no network
    Stub,
}

/// Configuration for the chat model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(rename = "type", default)]
    pub provider_type: ProviderType,
    /// API key (optional for Ollama)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Custom base URL (optional, uses default for each provider type)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// API key with blank values treated as absent.
    fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    fn base(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|b| !b.trim().is_empty())
    }
}

/// Create a provider from configuration.
///
/// Fails when a required credential is missing; callers decide how to degrade.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    if config.provider_type == ProviderType::Stub {
        tracing::info!("Chat provider ready: stub");
        return Ok(Arc::new(StubProvider));
    }

    let key = match (config.provider_type, config.key()) {
        (_, Some(key)) => key,
        (ProviderType::Ollama, None) => openai_compat::OLLAMA_PLACEHOLDER_KEY,
        (kind, None) => {
            return Err(anyhow!("{} requires api_key", kind_name(kind)));
        }
    };
    let base = config
        .base()
        .or_else(|| openai_compat::default_base(config.provider_type))
        .ok_or_else(|| anyhow!("custom provider requires base_url"))?;

    let provider = match config.timeout_secs {
        Some(secs) => OpenAiProvider::with_timeout(key, base, secs),
        None => OpenAiProvider::new(key, base),
    };
    tracing::info!(
        "Chat provider ready: {:?} at {}",
        config.provider_type,
        provider.api_base()
    );
    Ok(Arc::new(provider))
}

fn kind_name(kind: ProviderType) -> &'static str {
    match kind {
        ProviderType::Groq => "groq",
        ProviderType::OpenAI => "openai",
        ProviderType::Ollama => "ollama",
        ProviderType::Custom => "custom provider",
        ProviderType::Stub => "stub",
    }
}

/// Echoes the last user message back; used for offline runs and tests.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.text())
            .unwrap_or_default();
        let full_text = format!("[stub:{}] {}", request.model, user_text);
        Ok(LlmResponse {
            text: full_text.clone(),
            content: vec![ContentBlock::Text { text: full_text }],
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}
