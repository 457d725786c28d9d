//! Trait abstractions for runtime I/O
//!
//! The engine only talks to storage and tools through these traits so tests
//! can swap in the mocks from `testing`.

use crate::db::{ChatMessage, Database, DbError, Session, StoredMessage};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, ModelRegistry, ToolDefinition};
use crate::state_machine::{ConvState, Flow};
use crate::tools::{ToolCategory, ToolContext, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Checkpoint or transcript failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Append-only transcript per thread
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(
        &self,
        thread_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, StoreError>;

    /// Messages in sequence order
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Durable session snapshots keyed by thread
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<Session>, StoreError>;

    async fn save(
        &self,
        thread_id: &str,
        flow: Flow,
        state: &ConvState,
    ) -> Result<Session, StoreError>;
}

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// `None` when no tool has this name
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput>;

    /// Definitions offered to the model for `scope`
    fn definitions(&self, scope: &[ToolCategory]) -> Vec<ToolDefinition>;
}

/// Combined storage trait for convenience
pub trait Storage: MessageStore + CheckpointStore {}
impl<T: MessageStore + CheckpointStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn append_message(
        &self,
        thread_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, StoreError> {
        (**self).append_message(thread_id, message).await
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        (**self).get_messages(thread_id).await
    }
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self, thread_id: &str) -> Result<Option<Session>, StoreError> {
        (**self).load(thread_id).await
    }

    async fn save(
        &self,
        thread_id: &str,
        flow: Flow,
        state: &ConvState,
    ) -> Result<Session, StoreError> {
        (**self).save(thread_id, flow, state).await
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self, scope: &[ToolCategory]) -> Vec<ToolDefinition> {
        (**self).definitions(scope)
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn append_message(
        &self,
        thread_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, StoreError> {
        Ok(self.db.append_message(thread_id, message)?)
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.db.get_messages(thread_id)?)
    }
}

#[async_trait]
impl CheckpointStore for DatabaseStorage {
    async fn load(&self, thread_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.db.load_session(thread_id)?)
    }

    async fn save(
        &self,
        thread_id: &str,
        flow: Flow,
        state: &ConvState,
    ) -> Result<Session, StoreError> {
        Ok(self.db.save_session(thread_id, flow, state)?)
    }
}

/// Adapter resolving a model from the registry on every call
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: impl Into<String>) -> Self {
        Self {
            registry,
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl LlmService for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let llm = self
            .registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::network("No LLM available"))?;
        llm.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Adapter to use ToolRegistry as ToolExecutor
pub struct ToolRegistryExecutor {
    registry: ToolRegistry,
}

impl ToolRegistryExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self, scope: &[ToolCategory]) -> Vec<ToolDefinition> {
        self.registry.definitions(scope)
    }
}
