//! Runtime for executing conversations
//!
//! The engine owns no globals: every collaborator arrives through an
//! `AgentContext` built once at startup.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{ConversationEngine, EngineError, TurnInput, TurnOutcome};
pub use traits::*;

use crate::documents::DocumentContextProvider;
use crate::evaluator::{Evaluator, LlmEvaluator};
use crate::grammar::GrammarChecker;
use crate::llm::{LlmService, ModelRegistry};
use crate::tools::{ToolRegistry, WebSearchTool};
use std::sync::Arc;

/// Type alias for the engine used by the server
pub type ProductionEngine = ConversationEngine<DatabaseStorage>;

/// Collaborators shared by every agent flow
#[derive(Clone)]
pub struct AgentContext {
    pub llm: Arc<dyn LlmService>,
    pub evaluator: Arc<dyn Evaluator>,
    pub grammar: Arc<dyn GrammarChecker>,
    pub documents: Arc<dyn DocumentContextProvider>,
    pub tools: Arc<dyn ToolExecutor>,
}

impl AgentContext {
    /// Wire the real collaborators around the model registry
    pub fn production(
        registry: Arc<ModelRegistry>,
        grammar: Arc<dyn GrammarChecker>,
        documents: Arc<dyn DocumentContextProvider>,
        web_search: Option<WebSearchTool>,
    ) -> Self {
        let model_id = registry.default_model_id().to_string();
        let llm: Arc<dyn LlmService> = Arc::new(RegistryLlmClient::new(registry, model_id));
        Self {
            evaluator: Arc::new(LlmEvaluator::new(llm.clone())),
            llm,
            grammar,
            documents,
            tools: Arc::new(ToolRegistryExecutor::new(ToolRegistry::standard(web_search))),
        }
    }
}
