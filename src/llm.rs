//! Language model gateway
//!
//! Every agent talks to models through `LlmService`. Providers are
//! OpenAI-compatible chat endpoints picked from the registry.

mod error;
mod models;
mod openai;
mod registry;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use models::{all_models, ModelDef, Provider};
pub use registry::{LlmConfig, ModelInfo, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// A chat model the agents can call
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Registry id of the model behind this service
    fn model_id(&self) -> &str;
}

/// Wraps a provider and records one log line per completion
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let started = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &result {
            Ok(response) => tracing::info!(
                model = %self.model_id,
                elapsed_ms = %elapsed_ms,
                tools_offered = request.tools.len(),
                tool_calls = response.tool_uses().len(),
                end_turn = response.end_turn,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Completion finished"
            ),
            // Transient failures are expected now and then; agents fall back
            Err(e) if e.kind.is_retryable() => tracing::warn!(
                model = %self.model_id,
                elapsed_ms = %elapsed_ms,
                kind = ?e.kind,
                error = %e.message,
                "Completion failed"
            ),
            Err(e) => tracing::error!(
                model = %self.model_id,
                elapsed_ms = %elapsed_ms,
                kind = ?e.kind,
                error = %e.message,
                "Completion failed"
            ),
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
