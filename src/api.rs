//! HTTP API for the prompt agents
//!
//! A thin layer: each route validates its request, hands the turn to the
//! conversation engine and shapes the outcome for its agent.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::documents::DocumentIndex;
use crate::llm::ModelRegistry;
use crate::runtime::ProductionEngine;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProductionEngine>,
    /// Uploaded documents; the engine reads the same index
    pub documents: Arc<DocumentIndex>,
    pub llm_registry: Arc<ModelRegistry>,
}
