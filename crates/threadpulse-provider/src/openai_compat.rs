//! Base URLs for OpenAI-compatible endpoints.
//!
//! Groq, OpenAI and Ollama share the chat-completions wire format and differ
//! only in where they live.

use crate::ProviderType;

pub const OPENAI_BASE: &str = "https://api.openai.com/v1";
pub const GROQ_BASE: &str = "https://api.groq.com/openai/v1";
pub const OLLAMA_BASE: &str = "http://localhost:11434/v1";

/// Ollama ignores the key but the header must still be present.
pub const OLLAMA_PLACEHOLDER_KEY: &str = "ollama";

/// Base URL used when the config leaves `base_url` unset.
pub fn default_base(provider: ProviderType) -> Option<&'static str> {
    match provider {
        ProviderType::Groq => Some(GROQ_BASE),
        ProviderType::OpenAI => Some(OPENAI_BASE),
        ProviderType::Ollama => Some(OLLAMA_BASE),
        ProviderType::Custom | ProviderType::Stub => None,
    }
}
