//! Process configuration from the environment

use crate::grammar::{DEFAULT_LANGUAGE, DEFAULT_LANGUAGETOOL_URL};
use crate::llm::LlmConfig;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8000;

/// Everything the server reads at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Directory of `.txt`/`.md` files indexed at startup
    pub docs_dir: Option<PathBuf>,
    pub languagetool_url: String,
    pub languagetool_language: String,
    /// Enables the web search tool
    pub tavily_api_key: Option<String>,
    pub llm: LlmConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("PROMPT_COACH_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".prompt-coach").join("sessions.db")
            },
            PathBuf::from,
        );

        Self {
            db_path,
            port: var("PROMPT_COACH_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            docs_dir: var("PROMPT_COACH_DOCS_DIR").map(PathBuf::from),
            languagetool_url: var("LANGUAGETOOL_URL")
                .unwrap_or_else(|| DEFAULT_LANGUAGETOOL_URL.to_string()),
            languagetool_language: var("LANGUAGETOOL_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            tavily_api_key: var("TAVILY_API_KEY"),
            llm: LlmConfig {
                groq_api_key: var("GROQ_API_KEY"),
                openai_api_key: var("OPENAI_API_KEY"),
                default_model: var("DEFAULT_MODEL"),
                temperature: var("LLM_TEMPERATURE")
                    .and_then(|t| t.parse().ok())
                    .or(Some(0.3)),
            },
        }
    }
}
