//! Mock implementations for testing
//!
//! These mocks let the engine run end to end without network or disk.

use super::traits::*;
use super::AgentContext;
use crate::db::{ChatMessage, Session, StoredMessage};
use crate::documents::{DocumentContextProvider, NoDocuments};
use crate::evaluator::{Evaluation, EvaluationError, Evaluator};
use crate::grammar::{GrammarChecker, GrammarError, GrammarResult};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, ToolDefinition};
use crate::state_machine::{ConvState, Flow};
use crate::tools::{ToolCategory, ToolContext, ToolOutput};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
#[allow(dead_code)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

#[allow(dead_code)]
impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Evaluator
// ============================================================================

/// Evaluator returning queued verdicts; fails when the queue is empty
#[derive(Default)]
pub struct MockEvaluator {
    verdicts: Mutex<VecDeque<Result<Evaluation, EvaluationError>>>,
    instructions: Mutex<Vec<String>>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, evaluation: Evaluation) {
        self.verdicts.lock().unwrap().push_back(Ok(evaluation));
    }

    pub fn calls(&self) -> usize {
        self.instructions.lock().unwrap().len()
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for MockEvaluator {
    async fn evaluate(&self, instruction: &str) -> Result<Evaluation, EvaluationError> {
        self.instructions
            .lock()
            .unwrap()
            .push(instruction.to_string());
        self.verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EvaluationError::Malformed("no verdict queued".to_string())))
    }
}

// ============================================================================
// Mock Grammar Checker
// ============================================================================

/// Grammar checker returning queued results; unqueued text passes unchanged
#[derive(Default)]
pub struct MockGrammarChecker {
    results: Mutex<VecDeque<Result<GrammarResult, GrammarError>>>,
    checked: Mutex<Vec<String>>,
}

impl MockGrammarChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_result(&self, result: Result<GrammarResult, GrammarError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn checked_texts(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl GrammarChecker for MockGrammarChecker {
    async fn check(&self, text: &str) -> Result<GrammarResult, GrammarError> {
        self.checked.lock().unwrap().push(text.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(GrammarResult::unchanged(text)))
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Mock tool executor with scripted outputs
#[derive(Default)]
pub struct MockToolExecutor {
    tools: Vec<(String, ToolCategory, ToolOutput)>,
    /// Record of all executions (name, input)
    executions: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool with a fixed output
    pub fn with_tool(mut self, name: &str, category: ToolCategory, output: ToolOutput) -> Self {
        self.tools.push((name.to_string(), category, output));
        self
    }

    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, input: Value, _ctx: ToolContext) -> Option<ToolOutput> {
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));
        self.tools
            .iter()
            .find(|(tool, _, _)| tool == name)
            .map(|(_, _, output)| output.clone())
    }

    fn definitions(&self, scope: &[ToolCategory]) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|(_, category, _)| scope.contains(category))
            .map(|(name, _, _)| ToolDefinition {
                name: name.clone(),
                description: format!("Mock {name}"),
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect()
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// Storage with the same rules as the database: messages need a session
#[derive(Default)]
pub struct InMemoryStorage {
    sessions: Mutex<HashMap<String, Session>>,
    messages: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, thread_id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(thread_id).cloned()
    }

    pub fn messages(&self, thread_id: &str) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(thread_id)
            .map(|stored| stored.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStorage {
    async fn append_message(
        &self,
        thread_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, StoreError> {
        if !self.sessions.lock().unwrap().contains_key(thread_id) {
            return Err(StoreError::Backend(format!("no session {thread_id}")));
        }
        let mut messages = self.messages.lock().unwrap();
        let thread = messages.entry(thread_id.to_string()).or_default();
        #[allow(clippy::cast_possible_wrap)]
        let stored = StoredMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            sequence_id: thread.len() as i64 + 1,
            message: message.clone(),
            created_at: Utc::now(),
        };
        thread.push(stored.clone());
        Ok(stored)
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, thread_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.session(thread_id))
    }

    async fn save(
        &self,
        thread_id: &str,
        flow: Flow,
        state: &ConvState,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(thread_id.to_string())
            .or_insert_with(|| Session {
                thread_id: thread_id.to_string(),
                flow,
                state: ConvState::default(),
                created_at: now,
                updated_at: now,
            });
        session.state = state.clone();
        session.updated_at = now;
        Ok(session.clone())
    }
}

/// Storage whose every call fails
pub struct FailingStorage;

#[async_trait]
impl MessageStore for FailingStorage {
    async fn append_message(
        &self,
        _thread_id: &str,
        _message: &ChatMessage,
    ) -> Result<StoredMessage, StoreError> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }

    async fn get_messages(&self, _thread_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }
}

#[async_trait]
impl CheckpointStore for FailingStorage {
    async fn load(&self, _thread_id: &str) -> Result<Option<Session>, StoreError> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }

    async fn save(
        &self,
        _thread_id: &str,
        _flow: Flow,
        _state: &ConvState,
    ) -> Result<Session, StoreError> {
        Err(StoreError::Backend("disk unavailable".to_string()))
    }
}

// ============================================================================
// Test Harness
// ============================================================================

/// Mocks wired into an `AgentContext`, kept around for assertions
pub struct TestAgents {
    pub llm: Arc<MockLlmClient>,
    pub evaluator: Arc<MockEvaluator>,
    pub grammar: Arc<MockGrammarChecker>,
    pub tools: Arc<MockToolExecutor>,
    pub documents: Arc<dyn DocumentContextProvider>,
}

impl TestAgents {
    pub fn new(tools: MockToolExecutor) -> Self {
        Self {
            llm: Arc::new(MockLlmClient::new("mock-model")),
            evaluator: Arc::new(MockEvaluator::new()),
            grammar: Arc::new(MockGrammarChecker::new()),
            tools: Arc::new(tools),
            documents: Arc::new(NoDocuments),
        }
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentContextProvider>) -> Self {
        self.documents = documents;
        self
    }

    pub fn context(&self) -> AgentContext {
        AgentContext {
            llm: self.llm.clone(),
            evaluator: self.evaluator.clone(),
            grammar: self.grammar.clone(),
            documents: self.documents.clone(),
            tools: self.tools.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::documents::DocumentIndex;
    use crate::llm::{ContentBlock, Usage};
    use crate::prompts;
    use crate::runtime::{ConversationEngine, EngineError, TurnInput};
    use crate::state_machine::state::{CapturedField, CollectedFields};
    use crate::state_machine::{Category, Stage, ToolCall};
    use serde_json::json;

    struct Harness {
        engine: ConversationEngine<Arc<InMemoryStorage>>,
        storage: Arc<InMemoryStorage>,
        agents: TestAgents,
    }

    impl Harness {
        fn new(tools: MockToolExecutor) -> Self {
            Self::with_agents(TestAgents::new(tools))
        }

        fn with_agents(agents: TestAgents) -> Self {
            let storage = Arc::new(InMemoryStorage::new());
            let engine = ConversationEngine::new(storage.clone(), agents.context());
            Self {
                engine,
                storage,
                agents,
            }
        }

        /// Seed a session at a given state, as if earlier turns happened
        async fn seed(&self, thread_id: &str, flow: Flow, state: ConvState) {
            self.storage.save(thread_id, flow, &state).await.unwrap();
        }
    }

    fn coach_tools() -> MockToolExecutor {
        MockToolExecutor::new().with_tool(
            "grammar_checker",
            ToolCategory::Polish,
            ToolOutput::success("Grammar check complete. Here is the corrected text:\n---\nAct as a tutor."),
        )
    }

    fn tool_use_response(id: &str, name: &str, input: Value) -> LlmResponse {
        LlmResponse {
            content: vec![ContentBlock::tool_use(id, name, input)],
            end_turn: false,
            usage: Usage::default(),
        }
    }

    fn gathered_fields() -> CollectedFields {
        CollectedFields {
            task: Some(CapturedField::new("Tutor students in algebra")),
            context: Some(CapturedField::new("High school students preparing for exams")),
            references: vec![CapturedField::new("The class textbook, chapter 3")],
            ..CollectedFields::default()
        }
    }

    #[tokio::test]
    async fn test_greeting_never_reaches_evaluator() {
        let h = Harness::new(coach_tools());

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("hi"))
            .await
            .unwrap();

        assert_eq!(outcome.session.state.stage, Stage::AwaitingTaskInput);
        assert!(outcome.agent_output.starts_with("Hello!"));
        assert_eq!(h.agents.evaluator.calls(), 0);
        assert!(h.agents.grammar.checked_texts().is_empty());

        // Welcome, user message, re-prompt
        let visible: Vec<_> = outcome.history.iter().map(|m| m.role).collect();
        assert_eq!(visible, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(outcome.history[0].content, prompts::COACH_WELCOME);
    }

    #[tokio::test]
    async fn test_accepted_task_advances() {
        let h = Harness::new(coach_tools());
        h.agents
            .evaluator
            .queue(Evaluation::accept("Clear and actionable."));
        let task = "Build a customer support chatbot for refund requests";

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text(task))
            .await
            .unwrap();

        let state = &outcome.session.state;
        assert_eq!(state.stage, Stage::AwaitingContextInput);
        assert_eq!(state.fields.task_value(), task);
        assert_eq!(h.agents.grammar.checked_texts(), vec![task.to_string()]);
        assert_eq!(h.agents.evaluator.calls(), 1);
        assert!(h.agents.evaluator.instructions()[0].contains(task));
        assert!(outcome.agent_output.contains("Perfect! I understand your task"));
        assert_eq!(h.storage.session("t1").unwrap().state, *state);
    }

    #[tokio::test]
    async fn test_rejected_input_shows_feedback_verbatim() {
        let h = Harness::new(coach_tools());
        h.agents
            .evaluator
            .queue(Evaluation::reject("That reads like a shopping list, not a task."));

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("apples, pears, milk"))
            .await
            .unwrap();

        assert_eq!(outcome.session.state.stage, Stage::AwaitingTaskInput);
        assert!(outcome
            .agent_output
            .contains("That reads like a shopping list, not a task."));
        assert!(outcome.session.state.fields.task.is_none());
    }

    #[tokio::test]
    async fn test_evaluator_failure_is_a_retry_message() {
        // Nothing queued: the evaluator fails
        let h = Harness::new(coach_tools());

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("Write a haiku about rain"))
            .await
            .unwrap();

        assert_eq!(outcome.session.state.stage, Stage::AwaitingTaskInput);
        assert_eq!(outcome.agent_output, prompts::EVALUATION_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_bare_none_at_references_suggests_instead_of_advancing() {
        let h = Harness::new(coach_tools());
        let state = ConvState {
            fields: gathered_fields(),
            ..ConvState::at(Stage::AwaitingReferenceInput)
        };
        h.seed("t1", Flow::Coach, state).await;

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("none"))
            .await
            .unwrap();

        assert_eq!(outcome.session.state.stage, Stage::AwaitingReferenceInput);
        assert!(outcome.agent_output.contains(prompts::REFERENCE_SUGGESTIONS));
        assert_eq!(h.agents.evaluator.calls(), 0);
    }

    #[tokio::test]
    async fn test_proceed_without_references_skips_evaluation() {
        let h = Harness::new(coach_tools());
        let mut fields = gathered_fields();
        fields.references.clear();
        h.seed(
            "t1",
            Flow::Coach,
            ConvState {
                fields,
                ..ConvState::at(Stage::AwaitingReferenceInput)
            },
        )
        .await;

        let outcome = h
            .engine
            .handle_turn(
                "t1",
                Flow::Coach,
                TurnInput::text("proceed without references"),
            )
            .await
            .unwrap();

        let state = &outcome.session.state;
        assert_eq!(state.stage, Stage::AwaitingFinalPrompt);
        assert_eq!(state.fields.references.len(), 1);
        assert_eq!(state.fields.references[0].value, prompts::PLACEHOLDER_REFERENCE);
        assert_eq!(h.agents.evaluator.calls(), 0);
    }

    #[tokio::test]
    async fn test_final_prompt_is_polished_by_tool() {
        let h = Harness::new(coach_tools());
        h.seed(
            "t1",
            Flow::Coach,
            ConvState {
                fields: gathered_fields(),
                ..ConvState::at(Stage::AwaitingFinalPrompt)
            },
        )
        .await;
        h.agents.evaluator.queue(Evaluation::accept("Ready to use."));
        h.agents.llm.queue_response(tool_use_response(
            "call_1",
            "grammar_checker",
            json!({"text": "Act as a tutor."}),
        ));

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("Act as a tutor."))
            .await
            .unwrap();

        let state = &outcome.session.state;
        assert_eq!(state.stage, Stage::Completed);
        assert!(state.pending_tool.is_none());
        assert_eq!(state.fields.final_prompt_value(), "Act as a tutor.");
        assert!(state.fields.polished.as_deref().unwrap().contains("Act as a tutor."));
        assert!(outcome.agent_output.contains(prompts::POLISHING));
        assert!(outcome.agent_output.contains("Congratulations"));

        let executions = h.agents.tools.recorded_executions();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].0, "grammar_checker");

        // Polish offered only its scope, with the visible transcript
        let request = &h.agents.llm.recorded_requests()[0];
        assert_eq!(request.tools.len(), 1);
        assert!(request.messages.len() > 1);

        // Tool plumbing is stored but not shown
        let roles: Vec<_> = outcome.new_messages.iter().map(|m| m.role).collect();
        assert!(roles.contains(&Role::Tool));
        assert!(outcome.history.iter().all(|m| m.role != Role::Tool));
    }

    #[tokio::test]
    async fn test_final_prompt_without_tool_call_skips_registry() {
        let h = Harness::new(coach_tools());
        h.seed(
            "t1",
            Flow::Coach,
            ConvState {
                fields: gathered_fields(),
                ..ConvState::at(Stage::AwaitingFinalPrompt)
            },
        )
        .await;
        h.agents.evaluator.queue(Evaluation::accept("Great."));
        h.agents
            .llm
            .queue_response(LlmResponse::text_only("Looks good as written."));

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("Act as a tutor."))
            .await
            .unwrap();

        assert_eq!(outcome.session.state.stage, Stage::Completed);
        assert!(h.agents.tools.recorded_executions().is_empty());
        assert!(outcome.agent_output.contains("Looks good as written."));
    }

    #[tokio::test]
    async fn test_pending_tool_is_finished_before_new_input() {
        let h = Harness::new(coach_tools());
        let call = ToolCall::new("call_9", "grammar_checker", json!({"text": "Act as a tutor."}))
            .with_scope(&[ToolCategory::Polish]);
        let mut fields = gathered_fields();
        fields.final_prompt = Some(CapturedField::new("Act as a tutor."));
        h.seed(
            "t1",
            Flow::Coach,
            ConvState {
                fields,
                pending_tool: Some(call),
                ..ConvState::at(Stage::ReadyToRefine)
            },
        )
        .await;

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("thanks!"))
            .await
            .unwrap();

        assert_eq!(outcome.session.state.stage, Stage::Completed);
        assert_eq!(h.agents.tools.recorded_executions().len(), 1);
        assert_eq!(outcome.agent_output, prompts::COMPLETED_HINT);
    }

    #[tokio::test]
    async fn test_tool_outside_offered_scope_is_refused() {
        let tools = coach_tools().with_tool(
            "risen_refiner",
            ToolCategory::Precision,
            ToolOutput::success("RISEN OUTPUT"),
        );
        let h = Harness::new(tools);
        h.seed(
            "t1",
            Flow::Coach,
            ConvState {
                fields: gathered_fields(),
                ..ConvState::at(Stage::AwaitingFinalPrompt)
            },
        )
        .await;
        h.agents.evaluator.queue(Evaluation::accept("Ready to use."));
        h.agents.llm.queue_response(tool_use_response(
            "call_1",
            "risen_refiner",
            json!({"prompt": "Act as a tutor."}),
        ));

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("Act as a tutor."))
            .await
            .unwrap();

        let offered: Vec<_> = h.agents.llm.recorded_requests()[0]
            .tools
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(offered, vec!["grammar_checker".to_string()]);
        assert!(h.agents.tools.recorded_executions().is_empty());

        let state = &outcome.session.state;
        assert_eq!(state.stage, Stage::Completed);
        assert!(state.pending_tool.is_none());
        assert!(state.fields.polished.is_none());
        assert!(outcome
            .agent_output
            .contains("risen_refiner is not available in this step"));
    }

    #[tokio::test]
    async fn test_checkpointed_call_without_scope_is_refused() {
        let h = Harness::new(coach_tools());
        let mut fields = gathered_fields();
        fields.final_prompt = Some(CapturedField::new("Act as a tutor."));
        h.seed(
            "t1",
            Flow::Coach,
            ConvState {
                fields,
                pending_tool: Some(ToolCall::new("call_3", "grammar_checker", json!({}))),
                ..ConvState::at(Stage::ReadyToRefine)
            },
        )
        .await;

        let outcome = h.engine.step("t1", Flow::Coach).await.unwrap();

        assert_eq!(outcome.session.state.stage, Stage::Completed);
        assert!(h.agents.tools.recorded_executions().is_empty());
    }

    #[tokio::test]
    async fn test_thread_locks_are_released_after_turns() {
        let h = Harness::new(MockToolExecutor::new());
        for i in 0..50 {
            h.engine
                .handle_turn(&format!("t{i}"), Flow::Grammar, TurnInput::text("hello"))
                .await
                .unwrap();
        }
        assert_eq!(h.engine.tracked_threads(), 0);

        // Concurrent turns on one thread share a lock and still clean up
        let (a, b) = tokio::join!(
            h.engine.handle_turn("shared", Flow::Grammar, TurnInput::text("hello")),
            h.engine.handle_turn("shared", Flow::Grammar, TurnInput::text("hi there")),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(h.engine.tracked_threads(), 0);

        // Failed turns release too
        h.engine.step("missing", Flow::Grammar).await.unwrap_err();
        assert_eq!(h.engine.tracked_threads(), 0);
    }

    #[tokio::test]
    async fn test_step_on_unknown_thread_creates_nothing() {
        let h = Harness::new(coach_tools());

        let err = h.engine.step("ghost", Flow::Coach).await.unwrap_err();

        assert!(matches!(err, EngineError::ThreadNotFound { ref thread_id } if thread_id == "ghost"));
        assert!(h.storage.session("ghost").is_none());
        assert!(h.storage.messages("ghost").is_empty());
    }

    #[tokio::test]
    async fn test_step_without_new_user_message_waits() {
        let h = Harness::new(coach_tools());
        let first = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("hello"))
            .await
            .unwrap();
        let messages_before = h.storage.messages("t1");

        let again = h.engine.step("t1", Flow::Coach).await.unwrap();

        assert_eq!(again.session.state, first.session.state);
        assert_eq!(again.session.updated_at, first.session.updated_at);
        assert!(again.new_messages.is_empty());
        assert_eq!(h.storage.messages("t1"), messages_before);
        assert_eq!(again.agent_output, first.agent_output);
    }

    #[tokio::test]
    async fn test_step_answers_trailing_user_message() {
        let h = Harness::new(coach_tools());
        h.seed("t1", Flow::Coach, ConvState::at(Stage::AwaitingTaskInput))
            .await;
        h.storage
            .append_message("t1", &ChatMessage::user("hey"))
            .await
            .unwrap();

        let outcome = h.engine.step("t1", Flow::Coach).await.unwrap();

        assert!(outcome.agent_output.starts_with("Hello!"));
        assert_eq!(h.storage.messages("t1").len(), 2);
    }

    #[tokio::test]
    async fn test_missing_input_enters_error_then_resumes() {
        let h = Harness::new(coach_tools());
        h.seed("t1", Flow::Coach, ConvState::at(Stage::AwaitingContextInput))
            .await;

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::default())
            .await
            .unwrap();
        assert!(matches!(outcome.session.state.stage, Stage::Error { .. }));
        assert_eq!(outcome.agent_output, prompts::RESEND_REQUEST);

        h.agents.evaluator.queue(Evaluation::accept("Helpful context."));
        let outcome = h
            .engine
            .handle_turn(
                "t1",
                Flow::Coach,
                TurnInput::text("Used by first-year students before exams"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.session.state.stage, Stage::AwaitingReferenceInput);
    }

    #[tokio::test]
    async fn test_history_seeds_only_new_threads() {
        let h = Harness::new(coach_tools());
        let history = vec![
            ChatMessage::user("I was here before"),
            ChatMessage::assistant("Welcome back"),
        ];
        let input = TurnInput {
            user_input: Some("hi".to_string()),
            conversation_history: history.clone(),
            has_document: false,
        };

        h.engine
            .handle_turn("t1", Flow::Coach, input.clone())
            .await
            .unwrap();
        let stored = h.storage.messages("t1");
        assert_eq!(&stored[..2], &history[..]);

        h.engine
            .handle_turn("t1", Flow::Coach, input)
            .await
            .unwrap();
        let imported = h
            .storage
            .messages("t1")
            .iter()
            .filter(|m| m.content == "I was here before")
            .count();
        assert_eq!(imported, 1);
    }

    #[tokio::test]
    async fn test_refiner_tool_path() {
        let tools = MockToolExecutor::new()
            .with_tool(
                "core_refiner",
                ToolCategory::Clarity,
                ToolOutput::success("unused"),
            )
            .with_tool(
                "risen_refiner",
                ToolCategory::Precision,
                ToolOutput::success("**Role:** Network engineer\n**Steps:** ..."),
            );
        let h = Harness::new(tools);
        h.agents
            .llm
            .queue_response(LlmResponse::text_only("precision"));
        h.agents.llm.queue_response(tool_use_response(
            "call_1",
            "risen_refiner",
            json!({"prompt": "Explain TCP handshakes step by step"}),
        ));
        h.agents.llm.queue_response(LlmResponse::text_only(
            "RISEN suits this technical, step-by-step request.",
        ));

        let outcome = h
            .engine
            .handle_turn(
                "t1",
                Flow::Refiner,
                TurnInput::text("Explain TCP handshakes step by step"),
            )
            .await
            .unwrap();

        let state = &outcome.session.state;
        assert_eq!(state.stage, Stage::AwaitingPrompt);
        let refinement = state.refinement.as_ref().unwrap();
        assert_eq!(refinement.category, Category::Precision);
        assert_eq!(refinement.framework_used.as_deref(), Some("risen_refiner"));
        assert_eq!(
            state.refined_prompt(),
            Some("**Role:** Network engineer\n**Steps:** ...")
        );
        assert_eq!(
            outcome.agent_output,
            "RISEN suits this technical, step-by-step request."
        );

        let requests = h.agents.llm.recorded_requests();
        assert_eq!(requests.len(), 3);
        let offered: Vec<_> = requests[1].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["risen_refiner"]);
    }

    #[tokio::test]
    async fn test_refiner_fallbacks() {
        let h = Harness::new(MockToolExecutor::new());
        h.agents.llm.queue_response(LlmResponse::text_only("banana"));
        h.agents
            .llm
            .queue_response(LlmResponse::text_only("Write a limerick about a cat."));
        // Analysis call gets nothing queued and fails

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Refiner, TurnInput::text("poem cat funny"))
            .await
            .unwrap();

        let refinement = outcome.session.state.refinement.unwrap();
        assert_eq!(refinement.category, Category::Clarity);
        assert_eq!(refinement.framework_used.as_deref(), Some("direct_refinement"));
        assert!(h.agents.tools.recorded_executions().is_empty());
        assert!(outcome
            .agent_output
            .contains("Write a limerick about a cat."));
    }

    #[tokio::test]
    async fn test_refiner_offers_document_search_when_documents_exist() {
        let index = Arc::new(DocumentIndex::new());
        index
            .ingest("plan.md", "The launch is planned for March.")
            .unwrap();
        let tools = MockToolExecutor::new()
            .with_tool("core_refiner", ToolCategory::Clarity, ToolOutput::success("x"))
            .with_tool("document_search", ToolCategory::Rag, ToolOutput::success("y"));
        let h = Harness::with_agents(TestAgents::new(tools).with_documents(index));
        h.agents.llm.queue_response(LlmResponse::text_only("clarity"));

        h.engine
            .handle_turn(
                "t1",
                Flow::Refiner,
                TurnInput::text("Summarize the launch plan from the document"),
            )
            .await
            .unwrap();

        let requests = h.agents.llm.recorded_requests();
        let offered: Vec<_> = requests[1].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["core_refiner", "document_search"]);
    }

    #[tokio::test]
    async fn test_grammar_flow_records_correction() {
        let h = Harness::new(MockToolExecutor::new());
        h.agents.grammar.queue_result(Ok(GrammarResult {
            original_text: "She go to school.".to_string(),
            corrected_text: "She goes to school.".to_string(),
            corrections_made: vec!["'go' → 'goes'".to_string()],
            suggestions: vec![],
        }));

        let outcome = h
            .engine
            .handle_turn("t1", Flow::Grammar, TurnInput::text("She go to school."))
            .await
            .unwrap();

        let state = &outcome.session.state;
        assert_eq!(state.stage, Stage::AwaitingText);
        assert_eq!(
            state.grammar.as_ref().unwrap().corrected_text,
            "She goes to school."
        );
        assert!(outcome.agent_output.contains("'go' → 'goes'"));
        // The system instruction is stored but hidden
        assert_eq!(h.storage.messages("t1")[0].role, Role::System);
        assert!(outcome.history.iter().all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn test_thread_belongs_to_one_flow() {
        let h = Harness::new(MockToolExecutor::new());
        h.engine
            .handle_turn("t1", Flow::Grammar, TurnInput::text("hello"))
            .await
            .unwrap();

        let err = h
            .engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::FlowMismatch {
                expected: Flow::Coach,
                actual: Flow::Grammar,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_turn() {
        let agents = TestAgents::new(MockToolExecutor::new());
        let engine = ConversationEngine::new(FailingStorage, agents.context());

        let err = engine
            .handle_turn("t1", Flow::Coach, TurnInput::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert_eq!(agents.evaluator.calls(), 0);
    }

    #[test]
    fn test_threads_are_unique() {
        let agents = TestAgents::new(MockToolExecutor::new());
        let engine = ConversationEngine::new(InMemoryStorage::new(), agents.context());
        assert_ne!(engine.create_thread(), engine.create_thread());
    }
}
