//! Model definitions for the supported chat providers

use super::openai::{ChatModel, OpenAIService};
use super::LlmService;
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Groq,
    OpenAI,
}

impl Provider {
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Groq => "Groq",
            Provider::OpenAI => "OpenAI",
        }
    }

    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// Model ID, also the provider's API name
    pub id: &'static str,
    pub provider: Provider,
    pub description: &'static str,
    /// Factory: (api key, default temperature) -> service
    pub factory: fn(&str, Option<f32>) -> Result<Arc<dyn LlmService>, String>,
}

fn chat_factory(
    model: ChatModel,
    api_key: &str,
    temperature: Option<f32>,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!("{} requires an API key", model.api_name()));
    }
    OpenAIService::new(api_key.to_string(), model, temperature)
        .map(|service| Arc::new(service) as Arc<dyn LlmService>)
        .map_err(|e| e.to_string())
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "llama-3.1-8b-instant",
            provider: Provider::Groq,
            description: "Llama 3.1 8B on Groq (fast, default)",
            factory: |api_key, temperature| {
                chat_factory(ChatModel::Llama31Instant, api_key, temperature)
            },
        },
        ModelDef {
            id: "llama-3.3-70b-versatile",
            provider: Provider::Groq,
            description: "Llama 3.3 70B on Groq (stronger judgments)",
            factory: |api_key, temperature| {
                chat_factory(ChatModel::Llama33Versatile, api_key, temperature)
            },
        },
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            description: "GPT-4o mini (OpenAI)",
            factory: |api_key, temperature| {
                chat_factory(ChatModel::GPT4oMini, api_key, temperature)
            },
        },
    ]
}

/// The model used when none is configured
pub const DEFAULT_MODEL_ID: &str = "llama-3.1-8b-instant";
