//! Prompt Coach - LLM-powered prompt-engineering agents
//!
//! Three conversational agents share one engine: a guided coach, a one-shot
//! prompt refiner and a grammar corrector. Each is a pure state machine
//! whose effects the engine carries out against the model, the grammar
//! service, the document index and the SQLite checkpoint store.

mod api;
mod classifier;
mod config;
mod db;
mod documents;
mod evaluator;
mod grammar;
mod llm;
mod prompts;
mod runtime;
mod state_machine;
mod tools;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use documents::DocumentIndex;
use grammar::LanguageToolChecker;
use llm::ModelRegistry;
use runtime::{AgentContext, ConversationEngine, DatabaseStorage};
use std::net::SocketAddr;
use std::sync::Arc;
use tools::WebSearchTool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prompt_coach=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Initialize LLM registry
    let llm_registry = Arc::new(ModelRegistry::new(&config.llm));
    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!(
            vars = ?ModelRegistry::required_env_vars(),
            "No LLM API keys configured; agents will reply with fallbacks"
        );
    }

    // Documents for the refiner
    let documents = Arc::new(DocumentIndex::new());
    if let Some(dir) = &config.docs_dir {
        match documents.load_dir(dir) {
            Ok(chunks) => tracing::info!(dir = %dir.display(), chunks, "Loaded documents"),
            Err(e) => tracing::warn!(error = %e, "Document directory not loaded"),
        }
    }

    let grammar = Arc::new(LanguageToolChecker::new(
        config.languagetool_url.as_str(),
        config.languagetool_language.as_str(),
    )?);
    let web_search = config.tavily_api_key.as_deref().map(WebSearchTool::new);
    if web_search.is_none() {
        tracing::info!("TAVILY_API_KEY not set; web search tool disabled");
    }

    let agents = AgentContext::production(
        llm_registry.clone(),
        grammar,
        documents.clone(),
        web_search,
    );
    let engine = ConversationEngine::new(DatabaseStorage::new(db), agents);

    let state = AppState {
        engine: Arc::new(engine),
        documents,
        llm_registry,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Prompt coach listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
